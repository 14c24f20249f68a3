/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    database::SqlOutput,
    job::RunEnv,
    script::{catalog, find, split_fragments, split_safety_fragments, Credential},
};
use anyhow::anyhow;
use tokio::task::JoinSet;
use tracing::warn;

/// Runs each selected script with its fragments fanned out concurrently.
/// One result file per script, sharded by fragment when there are several.
pub(crate) async fn run_scripts(items: &[String], env: &mut RunEnv<'_>) -> anyhow::Result<()> {
    let scripts = catalog(env.context.config.scripts.dir.as_deref())?;

    for item in items {
        let Some(script) = find(&scripts, item) else {
            env.log(format!("[warn] No script named {}, skipping", item))
                .await;
            env.tick().await;
            continue;
        };

        let fragments = split_fragments(&script.body);
        let outputs = execute_fragments(env, &fragments).await;
        write_outputs(env, &script.name, outputs).await?;
        env.tick().await;
    }
    Ok(())
}

/// One worker per fragment, joined before the item's results are written.
/// Fragments have no ordering among themselves but the collected outputs
/// keep the fragment order of the script file.
async fn execute_fragments(
    env: &RunEnv<'_>,
    fragments: &[String],
) -> Vec<anyhow::Result<SqlOutput>> {
    let credentials = &env.context.config.database;
    let mut workers = JoinSet::new();
    for (index, fragment) in fragments.iter().enumerate() {
        let database = env.context.database.clone();
        let sql = fragment.clone();
        let user = credentials.user.clone();
        let password = credentials.password.clone();
        workers.spawn(async move { (index, database.execute_captured(&sql, &user, &password).await) });
    }

    let mut outputs: Vec<Option<anyhow::Result<SqlOutput>>> =
        fragments.iter().map(|_| None).collect();
    while let Some(res) = workers.join_next().await {
        match res {
            Ok((index, output)) => outputs[index] = Some(output),
            Err(err) => warn!("Script fragment worker panicked\n{}", err),
        }
    }
    outputs
        .into_iter()
        .map(|output| output.unwrap_or_else(|| Err(anyhow!("Fragment worker vanished"))))
        .collect()
}

async fn write_outputs(
    env: &RunEnv<'_>,
    name: &str,
    outputs: Vec<anyhow::Result<SqlOutput>>,
) -> anyhow::Result<()> {
    let sharded = outputs.len() > 1;
    for (index, output) in outputs.into_iter().enumerate() {
        let output = output.unwrap_or_else(|err| SqlOutput {
            lines: vec![],
            error: Some(err.to_string()),
        });
        if let Some(err) = &output.error {
            env.log(format!("[warn] {}: {}", name, err)).await;
        }
        env.sink
            .write_item(name, sharded.then_some(index), &output.into_contents())
            .await?;
    }
    Ok(())
}

/// Safety scripts probe grants, so their fragments run one after another
/// under the credentials each directive names. A malformed script is
/// reported and skipped, the batch keeps going.
pub(crate) async fn run_safety(items: &[String], env: &mut RunEnv<'_>) -> anyhow::Result<()> {
    let scripts = catalog(env.context.config.scripts.dir.as_deref())?;

    for item in items {
        let Some(script) = find(&scripts, item) else {
            env.log(format!("[warn] No script named {}, skipping", item))
                .await;
            env.tick().await;
            continue;
        };

        match split_safety_fragments(&script.body) {
            Ok(fragments) => {
                let contents = run_safety_fragments(env, &script.name, fragments).await;
                env.sink.write_item(&script.name, None, &contents).await?;
            }
            Err(err) => env.report(err).await,
        }
        env.tick().await;
    }
    Ok(())
}

async fn run_safety_fragments(
    env: &RunEnv<'_>,
    name: &str,
    fragments: Vec<(Credential, String)>,
) -> String {
    let credentials = &env.context.config.database;
    let mut contents = String::new();
    for (credential, sql) in fragments {
        let (user, password) = match credential {
            Credential::Root => (credentials.user.as_str(), credentials.password.as_str()),
            Credential::AppUser => (
                credentials.app_user.as_str(),
                credentials.app_password.as_str(),
            ),
        };
        let output = match env.context.database.execute_captured(&sql, user, password).await {
            Ok(output) => output,
            Err(err) => SqlOutput {
                lines: vec![],
                error: Some(err.to_string()),
            },
        };
        if let Some(err) = &output.error {
            env.log(format!("[warn] {}: {}", name, err)).await;
        }

        if !contents.is_empty() {
            contents.push_str("\n\n");
        }
        contents.push_str(&format!("-- as {}\n", user));
        contents.push_str(&output.into_contents());
    }
    contents
}
