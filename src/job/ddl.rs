/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    bench::{ensure_sysbench, SysbenchSpec, TpccSpec},
    database::SCRATCH_DB,
    job::RunEnv,
    load_generator::{stream_command, tail_log},
    operator::ScenarioKind,
};
use anyhow::Context;
use std::{path::Path, time::Duration};
use tracing::warn;

/// Table the online DDL scenarios alter underneath a sysbench run.
const DDL_TABLE: &str = "sbtest1";

/// Streams a local command into a file while forwarding its lines to the
/// log channel. Returns whether the command ran to its natural exit.
async fn stream_and_tail(command: &str, path: &Path, env: &RunEnv<'_>) -> anyhow::Result<bool> {
    let tail_token = env.operators.cancel.child_token();
    let tail_path = path.to_path_buf();
    let line_tx = env.log_sender();
    let stop = tail_token.clone();
    let tailer = tokio::spawn(async move {
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tail_log(&tail_path, line_tx) => {}
        }
    });

    let natural = stream_command(command, path, env.operators.cancel.clone()).await;

    // one more poll interval so the tailer drains the last lines
    tokio::time::sleep(Duration::from_secs(1)).await;
    tail_token.cancel();
    let _ = tailer.await;
    natural
}

/// Loads tpcc warehouses into the scratch database through the cluster
/// management tool. The prepare output is the run's artifact.
pub(crate) async fn run_load_data(tag: &str, env: &mut RunEnv<'_>) -> anyhow::Result<()> {
    let cfg = &env.context.config;
    let spec = TpccSpec::new(
        &cfg.cluster.ctl,
        &cfg.database.host,
        cfg.database.port,
        &cfg.database.user,
        &cfg.database.password,
    );

    if let Err(err) = env.context.executor.run_local(&spec.clean_command()).await {
        // a fresh cluster has nothing to clean
        env.log(format!("[warn] tpcc clean failed: {}", err)).await;
    }

    env.log("Loading tpcc warehouses".to_string()).await;
    let out_path = env.sink.item_path(tag, None);
    let natural = stream_and_tail(&spec.prepare_command(), &out_path, env).await?;
    if !natural {
        env.log("tpcc load interrupted".to_string()).await;
    }
    env.tick().await;
    Ok(())
}

/// Runs the configured workload to its own completion and keeps the log as
/// the artifact. Used to watch how regions spread after heavy writes.
pub(crate) async fn run_distribution(tag: &str, env: &mut RunEnv<'_>) -> anyhow::Result<()> {
    let out_path = env.sink.item_path(tag, None).with_extension("log");
    env.log(format!("Running {}", env.context.load.command()))
        .await;
    let natural = stream_and_tail(env.context.load.command(), &out_path, env).await?;
    if !natural {
        env.log("Workload interrupted".to_string()).await;
    }
    env.tick().await;
    Ok(())
}

/// Alters a table while sysbench hammers it, and keeps the schema before
/// and after as the artifact. The sysbench output lands in load.log.
pub(crate) async fn run_online_ddl(kind: ScenarioKind, env: &mut RunEnv<'_>) -> anyhow::Result<()> {
    let tag = kind.tag();
    let cfg = &env.context.config;
    ensure_sysbench(env.context.executor.as_ref()).await?;

    let spec = SysbenchSpec::new(
        &cfg.database.host,
        cfg.database.port,
        &cfg.database.user,
        &cfg.database.password,
    );
    env.log("Preparing sysbench tables".to_string()).await;
    env.context
        .executor
        .run_local(&spec.prepare_command())
        .await
        .context("sysbench prepare failed")?;

    let show = format!("SHOW CREATE TABLE {}.{}", SCRATCH_DB, DDL_TABLE);
    let before = env.context.database.execute(&show).await?;

    let bench_token = env.operators.cancel.child_token();
    let bench_cmd = spec.run_command();
    let bench_log = env.sink.load_log_path();
    let bench_stop = bench_token.clone();
    let bench =
        tokio::spawn(async move { stream_command(&bench_cmd, &bench_log, bench_stop).await });

    // let the bench settle before the DDL lands on a busy table
    tokio::time::sleep(Duration::from_secs(10)).await;

    let statement = match kind {
        ScenarioKind::OnlineDdlModifyColumn => {
            format!("ALTER TABLE {} MODIFY COLUMN pad VARCHAR(255)", DDL_TABLE)
        }
        _ => format!("ALTER TABLE {} ADD INDEX idx_c (c)", DDL_TABLE),
    };
    env.log(format!("Running {}", statement)).await;
    let output = env
        .context
        .database
        .execute_captured(&statement, &cfg.database.user, &cfg.database.password)
        .await?;
    if let Some(err) = &output.error {
        env.log(format!("[warn] {}: {}", tag, err)).await;
    }

    let after = env.context.database.execute(&show).await?;

    bench_token.cancel();
    match bench.await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!("sysbench run failed\n{}", err),
        Err(err) => warn!("sysbench worker panicked\n{}", err),
    }

    let mut contents = String::new();
    contents.push_str("-- before\n");
    contents.push_str(&before.join("\n"));
    contents.push_str(&format!("\n\n-- {}\n", statement));
    contents.push_str(&output.into_contents());
    contents.push_str("\n\n-- after\n");
    contents.push_str(&after.join("\n"));
    env.sink.write_item(tag, None, &contents).await?;

    env.tick().await;
    Ok(())
}

/// Install check for the bench tool, kept as its own scenario so operators
/// can sort out tooling before a timed run.
pub(crate) async fn run_install_bench(tag: &str, env: &mut RunEnv<'_>) -> anyhow::Result<()> {
    let contents = match ensure_sysbench(env.context.executor.as_ref()).await {
        Ok(()) => "sysbench is available\n".to_string(),
        Err(err) => {
            let line = format!("sysbench install failed: {}\n", err);
            env.report(err).await;
            line
        }
    };
    env.sink.write_item(tag, None, &contents).await?;
    env.tick().await;
    Ok(())
}
