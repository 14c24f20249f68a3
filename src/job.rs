/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod component;
pub mod ddl;
pub mod script;

use crate::{
    cluster::{ComponentKind, TopologySnapshot},
    load_generator::{countdown, tail_log},
    operator::{OperatorContext, ScenarioKind},
    results::ResultSink,
    HarnessContext,
};
use anyhow::{anyhow, Context};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// What one run executes: a scenario plus the items selected for it. Items
/// are script names, component addresses or label values depending on the
/// kind; their order decides execution and result order.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub kind: ScenarioKind,
    pub component: Option<ComponentKind>,
    pub items: Vec<String>,
}

impl JobSpec {
    pub fn new(kind: ScenarioKind, component: Option<ComponentKind>, items: Vec<String>) -> Self {
        // single shot kinds always run as one item named after the scenario
        let items = if kind.is_single_shot() {
            vec![kind.tag().to_string()]
        } else {
            items
        };
        Self {
            kind,
            component,
            items,
        }
    }
}

/// The four channels the presentation layer consumes. Ordering holds within
/// each channel, never across them.
pub struct JobChannels {
    pub progress: mpsc::Receiver<usize>,
    pub log: mpsc::Receiver<String>,
    pub error: mpsc::Receiver<anyhow::Error>,
    pub complete: mpsc::Receiver<bool>,
}

struct JobSenders {
    progress: mpsc::Sender<usize>,
    log: mpsc::Sender<String>,
    error: mpsc::Sender<anyhow::Error>,
    complete: mpsc::Sender<bool>,
}

fn make_channels() -> (JobSenders, JobChannels) {
    let (progress_tx, progress_rx) = mpsc::channel(64);
    let (log_tx, log_rx) = mpsc::channel(256);
    let (error_tx, error_rx) = mpsc::channel(64);
    let (complete_tx, complete_rx) = mpsc::channel(1);
    (
        JobSenders {
            progress: progress_tx,
            log: log_tx,
            error: error_tx,
            complete: complete_tx,
        },
        JobChannels {
            progress: progress_rx,
            log: log_rx,
            error: error_rx,
            complete: complete_rx,
        },
    )
}

/// Running item count. Emitted values are strictly increasing and the last
/// one equals the number of selected items when the run goes to completion.
struct Progress {
    done: usize,
    tx: mpsc::Sender<usize>,
}

impl Progress {
    fn new(tx: mpsc::Sender<usize>) -> Self {
        Self { done: 0, tx }
    }

    async fn tick(&mut self) {
        self.done += 1;
        let _ = self.tx.send(self.done).await;
    }
}

/// Everything a batch runner needs besides its own item list. Batch runners
/// live in the submodules, one per scenario category.
pub(crate) struct RunEnv<'a> {
    pub(crate) context: &'a HarnessContext,
    pub(crate) snapshot: &'a TopologySnapshot,
    pub(crate) sink: &'a ResultSink,
    pub(crate) operators: &'a OperatorContext,
    progress: Progress,
    log_tx: mpsc::Sender<String>,
    error_tx: mpsc::Sender<anyhow::Error>,
}

impl RunEnv<'_> {
    pub(crate) async fn tick(&mut self) {
        self.progress.tick().await;
    }

    pub(crate) async fn log(&self, line: String) {
        let _ = self.log_tx.send(line).await;
    }

    /// Surfaces a recoverable failure without stopping the batch.
    pub(crate) async fn report(&self, err: anyhow::Error) {
        warn!("{}", err);
        let _ = self.error_tx.send(err).await;
    }

    pub(crate) fn log_sender(&self) -> mpsc::Sender<String> {
        self.log_tx.clone()
    }

    /// Pause between consecutive targets of one batch.
    pub(crate) fn pacing(&self) -> Duration {
        self.context.load.pacing()
    }
}

/// Owns one scenario run from discovery to the completion signal. The run
/// itself happens on a spawned task; the caller watches the channels.
pub struct JobCoordinator {
    context: Arc<HarnessContext>,
    cancel: CancellationToken,
}

impl JobCoordinator {
    pub fn new(context: Arc<HarnessContext>, cancel: CancellationToken) -> Self {
        Self { context, cancel }
    }

    /// Spawns the run and hands back the channels the caller consumes.
    /// Exactly one completion value arrives, whatever happens in between.
    pub fn start(self, spec: JobSpec) -> JobChannels {
        let (senders, channels) = make_channels();
        tokio::spawn(async move {
            let ok = match self.execute(&spec, &senders).await {
                Ok(()) => true,
                Err(err) => {
                    let _ = senders.error.send(err).await;
                    false
                }
            };
            let _ = senders.complete.send(ok).await;
        });
        channels
    }

    async fn execute(&self, spec: &JobSpec, senders: &JobSenders) -> anyhow::Result<()> {
        let snapshot = self
            .context
            .discovery
            .discover()
            .await
            .context("Topology discovery failed")?;
        let sink = ResultSink::create(
            Path::new(&self.context.config.results.root),
            spec.kind.tag(),
        )?;

        self.context.load.reset();
        self.context.database.reset_scratch().await?;

        let job_token = self.cancel.child_token();
        let load_token = job_token.child_token();
        let operators = OperatorContext::new(
            self.context.executor.clone(),
            &self.context.config.cluster.name,
            &self.context.config.cluster.ctl,
            job_token.clone(),
        );

        let mut load_workers: JoinSet<anyhow::Result<()>> = JoinSet::new();
        let mut tail_handle = None;
        if spec.kind.is_load_bearing() {
            let load = self.context.load.clone();
            let log_path = sink.load_log_path();
            let token = load_token.clone();
            load_workers.spawn(async move { load.run(&log_path, token).await });

            let tail_path = sink.load_log_path();
            let line_tx = senders.log.clone();
            let token = job_token.clone();
            tail_handle = Some(tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tail_log(&tail_path, line_tx) => {}
                }
            }));
        }

        let mut env = RunEnv {
            context: &self.context,
            snapshot: &snapshot,
            sink: &sink,
            operators: &operators,
            progress: Progress::new(senders.progress.clone()),
            log_tx: senders.log.clone(),
            error_tx: senders.error.clone(),
        };
        let dispatched = self.dispatch(spec, &mut env).await;

        // postcare runs even when dispatch failed so the load never leaks
        if spec.kind.is_load_bearing() && dispatched.is_ok() {
            countdown(
                self.context.load.interval_minutes(),
                "Stopping the load",
                &senders.log,
            )
            .await;
        }
        if !self.context.load.is_over() {
            load_token.cancel();
        }
        while let Some(res) = load_workers.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    let _ = senders.error.send(err).await;
                }
                Err(err) => {
                    let _ = senders
                        .error
                        .send(anyhow!("Load worker panicked: {}", err))
                        .await;
                }
            }
        }

        // one more poll interval lets the tailer drain the last lines
        if tail_handle.is_some() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        job_token.cancel();
        if let Some(handle) = tail_handle {
            let _ = handle.await;
        }
        let mut cleanup = operators.take_cleanup_tasks();
        while cleanup.join_next().await.is_some() {}

        if dispatched.is_ok() && spec.kind.is_render() {
            if let Err(err) = self
                .context
                .renderer
                .render(&snapshot, sink.dir(), spec.kind.tag())
                .await
            {
                warn!("Dashboard render failed\n{}", err);
                let _ = senders.error.send(err).await;
            }
        }

        let collected = sink
            .collect_file(&self.context.history_path)
            .context("Unable to collect the command history log");
        dispatched.and(collected)
    }

    async fn dispatch(&self, spec: &JobSpec, env: &mut RunEnv<'_>) -> anyhow::Result<()> {
        match spec.kind {
            ScenarioKind::Script | ScenarioKind::OtherScript => {
                script::run_scripts(&spec.items, env).await
            }
            ScenarioKind::SafetyScript => script::run_safety(&spec.items, env).await,
            ScenarioKind::ScaleIn
            | ScenarioKind::Kill
            | ScenarioKind::DataCorrupted
            | ScenarioKind::Crash
            | ScenarioKind::RecoverSystemd
            | ScenarioKind::Reboot
            | ScenarioKind::DiskFull => {
                let component = spec.component.context(format!(
                    "Scenario {} needs a component kind",
                    spec.kind.tag()
                ))?;
                component::run_targets(spec.kind, component, &spec.items, env).await
            }
            ScenarioKind::Disaster => component::run_disaster(&spec.items, env).await,
            ScenarioKind::LoadDataTpcc => ddl::run_load_data(spec.kind.tag(), env).await,
            ScenarioKind::DataDistribution => ddl::run_distribution(spec.kind.tag(), env).await,
            ScenarioKind::OnlineDdlAddIndex | ScenarioKind::OnlineDdlModifyColumn => {
                ddl::run_online_ddl(spec.kind, env).await
            }
            ScenarioKind::InstallBench => ddl::run_install_bench(spec.kind.tag(), env).await,
        }
    }
}
