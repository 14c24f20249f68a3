/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod crash;
pub mod data_corrupted;
pub mod disk_full;
pub mod kill;
pub mod reboot;
pub mod recover_systemd;
pub mod scale_in;

use crate::{
    cluster::{ComponentInstance, ComponentKind},
    remote::{RemoteCommands, RemoteExecutor},
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::{
    fmt,
    sync::{Arc, Mutex},
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Everything the harness can run. The tag is the name used on the command
/// line and in result directory names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    Script,
    OtherScript,
    SafetyScript,
    ScaleIn,
    Kill,
    DataCorrupted,
    Crash,
    RecoverSystemd,
    Disaster,
    Reboot,
    DiskFull,
    LoadDataTpcc,
    DataDistribution,
    OnlineDdlAddIndex,
    OnlineDdlModifyColumn,
    InstallBench,
}

impl ScenarioKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ScenarioKind::Script => "script",
            ScenarioKind::OtherScript => "other-script",
            ScenarioKind::SafetyScript => "safety-script",
            ScenarioKind::ScaleIn => "scale-in",
            ScenarioKind::Kill => "kill",
            ScenarioKind::DataCorrupted => "data-corrupted",
            ScenarioKind::Crash => "crash",
            ScenarioKind::RecoverSystemd => "recover-systemd",
            ScenarioKind::Disaster => "disaster",
            ScenarioKind::Reboot => "reboot",
            ScenarioKind::DiskFull => "disk-full",
            ScenarioKind::LoadDataTpcc => "load-data-tpcc",
            ScenarioKind::DataDistribution => "data-distribution",
            ScenarioKind::OnlineDdlAddIndex => "ddl-add-index",
            ScenarioKind::OnlineDdlModifyColumn => "ddl-modify-column",
            ScenarioKind::InstallBench => "install-bench",
        }
    }

    pub fn try_from_tag(tag: &str) -> anyhow::Result<ScenarioKind> {
        ScenarioKind::all()
            .iter()
            .find(|kind| kind.tag() == tag)
            .copied()
            .context(format!("Unknown scenario {}", tag))
    }

    pub fn all() -> &'static [ScenarioKind] {
        &[
            ScenarioKind::Script,
            ScenarioKind::OtherScript,
            ScenarioKind::SafetyScript,
            ScenarioKind::ScaleIn,
            ScenarioKind::Kill,
            ScenarioKind::DataCorrupted,
            ScenarioKind::Crash,
            ScenarioKind::RecoverSystemd,
            ScenarioKind::Disaster,
            ScenarioKind::Reboot,
            ScenarioKind::DiskFull,
            ScenarioKind::LoadDataTpcc,
            ScenarioKind::DataDistribution,
            ScenarioKind::OnlineDdlAddIndex,
            ScenarioKind::OnlineDdlModifyColumn,
            ScenarioKind::InstallBench,
        ]
    }

    /// Scenarios that run the background load generator while they act.
    pub fn is_load_bearing(&self) -> bool {
        matches!(
            self,
            ScenarioKind::ScaleIn
                | ScenarioKind::Kill
                | ScenarioKind::DataCorrupted
                | ScenarioKind::Crash
                | ScenarioKind::Disaster
                | ScenarioKind::Reboot
                | ScenarioKind::DiskFull
        )
    }

    /// Scenarios whose runs end with dashboard panels rendered as evidence.
    pub fn is_render(&self) -> bool {
        self.is_load_bearing()
            || matches!(
                self,
                ScenarioKind::DataDistribution
                    | ScenarioKind::OnlineDdlAddIndex
                    | ScenarioKind::OnlineDdlModifyColumn
            )
    }

    /// Scenarios that take a component target per item.
    pub fn is_component_targeted(&self) -> bool {
        matches!(
            self,
            ScenarioKind::ScaleIn
                | ScenarioKind::Kill
                | ScenarioKind::DataCorrupted
                | ScenarioKind::Crash
                | ScenarioKind::RecoverSystemd
                | ScenarioKind::Reboot
                | ScenarioKind::DiskFull
        )
    }

    /// Scenarios that run once as a whole rather than once per selected item.
    pub fn is_single_shot(&self) -> bool {
        matches!(
            self,
            ScenarioKind::LoadDataTpcc
                | ScenarioKind::DataDistribution
                | ScenarioKind::OnlineDdlAddIndex
                | ScenarioKind::OnlineDdlModifyColumn
                | ScenarioKind::InstallBench
        )
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// The component instance an operator acts on.
#[derive(Debug, Clone)]
pub struct Target {
    pub kind: ComponentKind,
    pub host: String,
    pub port: u16,
    pub deploy_path: String,
}

impl Target {
    pub fn from_instance(kind: ComponentKind, instance: &ComponentInstance) -> Target {
        Target {
            kind,
            host: instance.host.clone(),
            port: instance.port,
            deploy_path: instance.deploy_path.clone(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A single fault injection against a single target.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn execute(&self) -> anyhow::Result<()>;
}

/// Shared handles the operator builder wires into each operator. Cleanup
/// watchers registered by operators (disk filling) are joined by the job
/// after the run token is cancelled.
pub struct OperatorContext {
    pub executor: Arc<dyn RemoteExecutor>,
    pub cluster_name: String,
    pub ctl: String,
    pub cancel: CancellationToken,
    pub cleanup_tasks: Arc<Mutex<JoinSet<()>>>,
}

impl OperatorContext {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        cluster_name: &str,
        ctl: &str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            cluster_name: cluster_name.to_string(),
            ctl: ctl.to_string(),
            cancel,
            cleanup_tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Takes the registered cleanup watchers for joining.
    pub fn take_cleanup_tasks(&self) -> JoinSet<()> {
        let mut tasks = self
            .cleanup_tasks
            .lock()
            .expect("cleanup task set lock poisoned");
        std::mem::take(&mut *tasks)
    }
}

/// Maps a scenario kind onto its operator. Kinds that do not act on a
/// single component are build errors, which keeps the mapping closed.
pub fn build(
    kind: ScenarioKind,
    target: Target,
    ctx: &OperatorContext,
) -> anyhow::Result<Box<dyn Operator>> {
    match kind {
        ScenarioKind::Kill => Ok(Box::new(kill::KillOperator::new(
            target,
            ctx.executor.clone(),
        ))),
        ScenarioKind::Crash => Ok(Box::new(crash::CrashOperator::new(
            target,
            ctx.executor.clone(),
        ))),
        ScenarioKind::RecoverSystemd => Ok(Box::new(recover_systemd::RecoverSystemdOperator::new(
            target,
            ctx.executor.clone(),
        ))),
        ScenarioKind::DataCorrupted => Ok(Box::new(data_corrupted::DataCorruptedOperator::new(
            target,
            ctx.executor.clone(),
        ))),
        ScenarioKind::DiskFull => Ok(Box::new(disk_full::DiskFullOperator::new(
            target,
            ctx.executor.clone(),
            ctx.cancel.clone(),
            ctx.cleanup_tasks.clone(),
        ))),
        ScenarioKind::ScaleIn => Ok(Box::new(scale_in::ScaleInOperator::new(
            target,
            ctx.executor.clone(),
            &ctx.cluster_name,
            &ctx.ctl,
        ))),
        ScenarioKind::Reboot => Ok(Box::new(reboot::RebootOperator::new(
            target,
            ctx.executor.clone(),
        ))),
        other => Err(anyhow!(
            "Scenario {} does not act on a single component",
            other.tag()
        )),
    }
}

/// Path of the systemd unit file that manages a component process.
pub(crate) fn service_unit(kind: ComponentKind, port: u16) -> String {
    format!("/etc/systemd/system/{}-{}.service", kind.as_str(), port)
}

/// Reads the data directory out of a node's startup script. The flag shape
/// differs between storage and placement scripts, no other kind carries one.
pub(crate) async fn resolve_data_dir(
    executor: &dyn RemoteExecutor,
    target: &Target,
) -> anyhow::Result<String> {
    let (pattern, script) = match target.kind {
        ComponentKind::Storage => (r"--data-dir \K[^\n:]+", "run_storage.sh"),
        ComponentKind::PlacementAuthority => (r"--data-dir=\K[^\s]*", "run_placement.sh"),
        kind => {
            return Err(anyhow!(
                "No data directory introspection for {} nodes",
                kind
            ))
        }
    };
    let file = format!("{}/scripts/{}", target.deploy_path, script);
    let dir = executor.grep_value(&target.host, pattern, &file).await?;
    if dir.is_empty() {
        return Err(anyhow!(
            "Unable to find the data directory of {} {}",
            target.kind,
            target.address()
        ));
    }
    Ok(dir)
}

/// The columnar engine reads its client port from its own config file, so
/// the port is looked up right before every action that needs it instead of
/// being cached in the snapshot.
pub(crate) async fn resolve_columnar_port(
    executor: &dyn RemoteExecutor,
    host: &str,
    deploy_path: &str,
) -> anyhow::Result<u16> {
    let cmd = format!(
        "grep tcp_port {}/conf/columnar.toml | awk -F '= ' '{{print $2}}'",
        deploy_path
    );
    let out = executor.run(host, &cmd).await?;
    out.trim()
        .parse::<u16>()
        .context(format!("Bad columnar client port: {:?}", out.trim()))
}

/// Port a target's systemd unit and pid lookup key off. Columnar nodes
/// resolve it from their config file.
pub(crate) async fn service_port(
    executor: &dyn RemoteExecutor,
    target: &Target,
) -> anyhow::Result<u16> {
    match target.kind {
        ComponentKind::ColumnarStorage => {
            resolve_columnar_port(executor, &target.host, &target.deploy_path).await
        }
        _ => Ok(target.port),
    }
}
