/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::anyhow;
use async_trait::async_trait;
use shakedown::{
    cluster::ComponentKind,
    operator::{
        self, crash::CrashOperator, kill::KillOperator, reboot::RebootOperator,
        scale_in::ScaleInOperator, Operator, OperatorContext, ScenarioKind, Target,
    },
    remote::RemoteExecutor,
};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Executor that answers commands from a canned script and records every
/// command it saw, local ones under the host name "local".
struct RecordingExecutor {
    responses: Vec<(&'static str, &'static str)>,
    fail_on: Option<&'static str>,
    commands: Mutex<Vec<(String, String)>>,
}

impl RecordingExecutor {
    fn new(responses: Vec<(&'static str, &'static str)>) -> Arc<Self> {
        Arc::new(Self {
            responses,
            fail_on: None,
            commands: Mutex::new(vec![]),
        })
    }

    fn failing_on(needle: &'static str) -> Arc<Self> {
        Arc::new(Self {
            responses: vec![],
            fail_on: Some(needle),
            commands: Mutex::new(vec![]),
        })
    }

    fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    fn reply(&self, host: &str, cmd: &str) -> anyhow::Result<String> {
        self.commands
            .lock()
            .unwrap()
            .push((host.to_string(), cmd.to_string()));
        if let Some(needle) = self.fail_on {
            if cmd.contains(needle) {
                return Err(anyhow!("connection dropped"));
            }
        }
        for (needle, canned) in &self.responses {
            if cmd.contains(needle) {
                return Ok(canned.to_string());
            }
        }
        Ok(String::new())
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn run(&self, host: &str, cmd: &str) -> anyhow::Result<String> {
        self.reply(host, cmd)
    }

    async fn run_local(&self, cmd: &str) -> anyhow::Result<String> {
        self.reply("local", cmd)
    }
}

fn target(kind: ComponentKind, host: &str, port: u16, deploy_path: &str) -> Target {
    Target {
        kind,
        host: host.to_string(),
        port,
        deploy_path: deploy_path.to_string(),
    }
}

fn storage_target(host: &str, port: u16) -> Target {
    target(ComponentKind::Storage, host, port, "/deploy/storage")
}

#[tokio::test]
async fn kill_with_no_listener_succeeds_without_killing() -> anyhow::Result<()> {
    let executor = RecordingExecutor::new(vec![("fuser", "")]);
    let op = KillOperator::new(storage_target("10.0.0.1", 20160), executor.clone());

    op.execute().await?;

    let commands = executor.commands();
    assert_eq!(commands.len(), 1, "only the pid lookup should run");
    assert!(!commands.iter().any(|(_, cmd)| cmd.contains("kill -9")));
    Ok(())
}

#[tokio::test]
async fn kill_sends_exactly_one_kill_for_the_listener_pid() -> anyhow::Result<()> {
    let executor = RecordingExecutor::new(vec![("fuser", "20160/tcp: 1234")]);
    let op = KillOperator::new(storage_target("10.0.0.1", 20160), executor.clone());

    op.execute().await?;

    let kills: Vec<_> = executor
        .commands()
        .into_iter()
        .filter(|(_, cmd)| cmd.contains("kill -9"))
        .collect();
    assert_eq!(kills, vec![("10.0.0.1".to_string(), "sudo kill -9 1234".to_string())]);
    Ok(())
}

#[tokio::test]
async fn kill_treats_an_unreachable_host_as_done() -> anyhow::Result<()> {
    let executor = RecordingExecutor::failing_on("fuser");
    let op = KillOperator::new(storage_target("10.0.0.1", 20160), executor.clone());

    // the node being unreachable is the scenario outcome, not a failure
    op.execute().await?;
    Ok(())
}

#[tokio::test]
async fn crash_disables_restarts_before_killing() -> anyhow::Result<()> {
    let executor = RecordingExecutor::new(vec![("fuser", "1234")]);
    let op = CrashOperator::new(storage_target("10.0.0.2", 20160), executor.clone());

    op.execute().await?;

    let commands = executor.commands();
    let sed = commands
        .iter()
        .position(|(_, cmd)| cmd.contains("s/Restart=always/Restart=no/g"))
        .expect("restart policy should be disabled");
    let kill = commands
        .iter()
        .position(|(_, cmd)| cmd.contains("kill -9"))
        .expect("the process should be killed");
    assert!(sed < kill, "policy change must land before the kill");
    assert!(commands[sed]
        .1
        .contains("/etc/systemd/system/storage-20160.service"));
    Ok(())
}

#[tokio::test]
async fn data_corrupted_refuses_unsupported_kinds_before_any_remote_command() {
    let executor = RecordingExecutor::new(vec![]);
    let ctx = OperatorContext::new(
        executor.clone(),
        "testbed",
        "clusterctl",
        CancellationToken::new(),
    );
    let dashboard = target(ComponentKind::Dashboard, "10.0.0.9", 3000, "/deploy/dash");

    let op = operator::build(ScenarioKind::DataCorrupted, dashboard, &ctx).unwrap();
    let res = op.execute().await;

    assert!(res.is_err());
    assert!(
        executor.commands().is_empty(),
        "an unsupported kind must fail before touching the host"
    );
}

#[tokio::test]
async fn disk_full_aftercare_reclaims_the_host() -> anyhow::Result<()> {
    let executor = RecordingExecutor::new(vec![
        ("grep -oP", "/data1"),
        ("ps -ef", "4321"),
    ]);
    let cancel = CancellationToken::new();
    let ctx = OperatorContext::new(executor.clone(), "testbed", "clusterctl", cancel.clone());

    let op = operator::build(
        ScenarioKind::DiskFull,
        storage_target("10.0.0.3", 20160),
        &ctx,
    )?;
    op.execute().await?;

    cancel.cancel();
    let mut cleanup = ctx.take_cleanup_tasks();
    while cleanup.join_next().await.is_some() {}

    let commands = executor.commands();
    assert!(
        commands
            .iter()
            .any(|(_, cmd)| cmd.contains("-filename=/data1/disk_full")),
        "the filler should write into the data directory"
    );
    assert!(commands
        .iter()
        .any(|(_, cmd)| cmd == "sudo kill -9 4321"));
    assert!(commands
        .iter()
        .any(|(_, cmd)| cmd == "sudo rm -rf /data1/disk_full"));
    Ok(())
}

#[tokio::test]
async fn scale_in_uses_the_freshly_resolved_columnar_port() -> anyhow::Result<()> {
    let executor = RecordingExecutor::new(vec![("grep tcp_port", "3930\n")]);
    // the snapshot port is stale on purpose
    let columnar = target(ComponentKind::ColumnarStorage, "10.0.0.4", 9000, "/deploy/columnar");
    let op = ScaleInOperator::new(columnar, executor.clone(), "testbed", "clusterctl");

    op.execute().await?;

    let locals: Vec<_> = executor
        .commands()
        .into_iter()
        .filter(|(host, _)| host == "local")
        .collect();
    assert_eq!(locals.len(), 1);
    assert_eq!(
        locals[0].1,
        "clusterctl cluster scale-in testbed -N 10.0.0.4:3930 --yes"
    );
    Ok(())
}

#[tokio::test]
async fn reboot_swallows_the_dropped_session() -> anyhow::Result<()> {
    let executor = RecordingExecutor::failing_on("reboot");
    let op = RebootOperator::new(storage_target("10.0.0.5", 20160), executor.clone());

    op.execute().await?;

    assert!(executor
        .commands()
        .iter()
        .any(|(host, cmd)| host == "10.0.0.5" && cmd == "sudo reboot"));
    Ok(())
}

#[tokio::test]
async fn build_rejects_kinds_without_a_component_operator() {
    let executor = RecordingExecutor::new(vec![]);
    let ctx = OperatorContext::new(
        executor,
        "testbed",
        "clusterctl",
        CancellationToken::new(),
    );

    for kind in [
        ScenarioKind::Script,
        ScenarioKind::Disaster,
        ScenarioKind::LoadDataTpcc,
    ] {
        let res = operator::build(kind, storage_target("10.0.0.1", 20160), &ctx);
        assert!(res.is_err(), "{} must not map to an operator", kind.tag());
    }
}
