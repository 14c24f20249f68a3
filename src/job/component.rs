/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    cluster::ComponentKind,
    job::RunEnv,
    operator::{self, ScenarioKind, Target},
};

/// Injects one fault per selected target, in selection order. Targets not
/// present in the snapshot are skipped with a note, operator failures are
/// reported and the batch keeps going.
pub(crate) async fn run_targets(
    kind: ScenarioKind,
    component: ComponentKind,
    items: &[String],
    env: &mut RunEnv<'_>,
) -> anyhow::Result<()> {
    for (index, item) in items.iter().enumerate() {
        if env.operators.cancel.is_cancelled() {
            break;
        }
        let Some(instance) = env.snapshot.find(component, item) else {
            env.log(format!("[warn] No {} at {}, skipping", component, item))
                .await;
            env.tick().await;
            continue;
        };

        let target = Target::from_instance(component, instance);
        execute_target(kind, target, env).await;
        env.tick().await;

        if index + 1 < items.len() {
            pace(env).await;
        }
    }
    Ok(())
}

/// Crashes one storage node per failure domain. Domains come from the
/// configured label; an explicit selection narrows them down.
pub(crate) async fn run_disaster(items: &[String], env: &mut RunEnv<'_>) -> anyhow::Result<()> {
    let label = env.context.config.cluster.disaster_label.clone();
    let values = if items.is_empty() {
        env.snapshot.label_values(ComponentKind::Storage, &label)
    } else {
        items.to_vec()
    };

    for (index, value) in values.iter().enumerate() {
        if env.operators.cancel.is_cancelled() {
            break;
        }
        let found = env
            .snapshot
            .instances(ComponentKind::Storage)
            .iter()
            .find(|instance| instance.labels.get(&label) == Some(value));
        let Some(instance) = found else {
            env.log(format!(
                "[warn] No storage node labeled {}={}, skipping",
                label, value
            ))
            .await;
            env.tick().await;
            continue;
        };

        let target = Target::from_instance(ComponentKind::Storage, instance);
        execute_target(ScenarioKind::Crash, target, env).await;
        env.tick().await;

        if index + 1 < values.len() {
            pace(env).await;
        }
    }
    Ok(())
}

async fn execute_target(kind: ScenarioKind, target: Target, env: &RunEnv<'_>) {
    let what = format!("{} against {} {}", kind.tag(), target.kind, target.address());
    match operator::build(kind, target, env.operators) {
        Ok(op) => {
            if let Err(err) = op.execute().await {
                env.report(err.context(what)).await;
            }
        }
        Err(err) => env.report(err).await,
    }
}

/// The cluster needs time to react between injections. Cancellation cuts
/// the wait short.
async fn pace(env: &RunEnv<'_>) {
    tokio::select! {
        _ = env.operators.cancel.cancelled() => {}
        _ = tokio::time::sleep(env.pacing()) => {}
    }
}
