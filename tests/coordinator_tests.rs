/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::anyhow;
use async_trait::async_trait;
use shakedown::{
    cluster::{discovery::TopologyDiscovery, ComponentInstance, ComponentKind, TopologySnapshot},
    config::Config,
    dashboard::DashboardRenderer,
    database::{DatabaseClient, SqlOutput},
    job::{JobChannels, JobCoordinator, JobSpec},
    load_generator::LoadGenerator,
    operator::ScenarioKind,
    remote::RemoteExecutor,
    HarnessContext,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

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

struct StaticDiscovery {
    snapshot: TopologySnapshot,
}

#[async_trait]
impl TopologyDiscovery for StaticDiscovery {
    async fn discover(&self) -> anyhow::Result<TopologySnapshot> {
        Ok(self.snapshot.clone())
    }
}

struct FailingDiscovery;

#[async_trait]
impl TopologyDiscovery for FailingDiscovery {
    async fn discover(&self) -> anyhow::Result<TopologySnapshot> {
        Err(anyhow!("control plane is down"))
    }
}

struct RecordingClient {
    statements: Mutex<Vec<String>>,
}

impl RecordingClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            statements: Mutex::new(vec![]),
        })
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatabaseClient for RecordingClient {
    async fn execute(&self, sql: &str) -> anyhow::Result<Vec<String>> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(vec![])
    }

    async fn execute_captured(
        &self,
        sql: &str,
        user: &str,
        _password: &str,
    ) -> anyhow::Result<SqlOutput> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(SqlOutput {
            lines: vec![format!("ran as {}: {}", user, sql)],
            error: None,
        })
    }
}

#[derive(Default)]
struct NullRenderer {
    renders: AtomicUsize,
}

#[async_trait]
impl DashboardRenderer for NullRenderer {
    async fn render(
        &self,
        _snapshot: &TopologySnapshot,
        _result_dir: &Path,
        _tag: &str,
    ) -> anyhow::Result<()> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config(root: &Path, scripts_dir: Option<&Path>) -> Config {
    let mut toml = format!(
        "[database]\nhost = \"127.0.0.1\"\nuser = \"root\"\n\n\
         [ssh]\nuser = \"deploy\"\n\n\
         [cluster]\nname = \"testbed\"\nentry = \"127.0.0.1:2379\"\n\n\
         [load]\ncommand = \"echo load-done\"\ninterval_minutes = 0\npacing_secs = 0\n\n\
         [results]\nroot = \"{}\"\n",
        root.display()
    );
    if let Some(dir) = scripts_dir {
        toml.push_str(&format!("\n[scripts]\ndir = \"{}\"\n", dir.display()));
    }
    Config::try_from_str(&toml).unwrap()
}

fn storage_snapshot(addrs: &[(&str, u16)]) -> TopologySnapshot {
    let instances = addrs
        .iter()
        .map(|(host, port)| ComponentInstance {
            host: host.to_string(),
            port: *port,
            status_port: None,
            deploy_path: "/deploy/storage".to_string(),
            labels: HashMap::new(),
            is_leader: false,
        })
        .collect();
    let mut snapshot = TopologySnapshot::new();
    snapshot.insert(ComponentKind::Storage, instances);
    snapshot
}

struct Fixture {
    context: Arc<HarnessContext>,
    database: Arc<RecordingClient>,
    renderer: Arc<NullRenderer>,
    results_root: PathBuf,
}

fn fixture(
    dir: &Path,
    discovery: Arc<dyn TopologyDiscovery>,
    executor: Arc<RecordingExecutor>,
    scripts_dir: Option<&Path>,
) -> Fixture {
    let results_root = dir.join("result");
    let config = test_config(&results_root, scripts_dir);

    let history_path = dir.join("history.log");
    std::fs::write(&history_path, "[local] echo hi\n").unwrap();

    let database = RecordingClient::new();
    let renderer = Arc::new(NullRenderer::default());
    let load = LoadGenerator::new(
        &config.load.command,
        config.load.interval_minutes,
        config.load.pacing_secs,
    );

    let context = HarnessContext {
        config,
        executor,
        database: database.clone(),
        discovery,
        renderer: renderer.clone(),
        load,
        history_path,
    };
    Fixture {
        context: Arc::new(context),
        database,
        renderer,
        results_root,
    }
}

#[derive(Default)]
struct Consumed {
    progress: Vec<usize>,
    logs: Vec<String>,
    errors: Vec<String>,
    completions: Vec<bool>,
}

/// Drains all four channels until the run closes them, the way the
/// presentation layer does.
async fn consume(mut channels: JobChannels) -> Consumed {
    let mut out = Consumed::default();
    loop {
        tokio::select! {
            Some(done) = channels.progress.recv() => out.progress.push(done),
            Some(line) = channels.log.recv() => out.logs.push(line),
            Some(err) = channels.error.recv() => out.errors.push(format!("{:#}", err)),
            Some(ok) = channels.complete.recv() => out.completions.push(ok),
            else => break,
        }
    }
    out
}

async fn run_and_consume(fixture: &Fixture, spec: JobSpec) -> Consumed {
    let coordinator = JobCoordinator::new(fixture.context.clone(), CancellationToken::new());
    let channels = coordinator.start(spec);
    tokio::time::timeout(Duration::from_secs(60), consume(channels))
        .await
        .expect("the run should wind down on its own")
}

/// The single directory a run created under the results root.
fn run_dir(root: &Path, tag: &str) -> PathBuf {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
        .expect("results root should exist")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&format!("{}_", tag)))
        })
        .collect();
    assert_eq!(dirs.len(), 1, "expected exactly one {} run directory", tag);
    dirs.remove(0)
}

#[tokio::test]
async fn script_run_counts_progress_and_writes_indexed_results() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let scripts = dir.path().join("scripts");
    std::fs::create_dir(&scripts)?;
    std::fs::write(scripts.join("alpha.sql"), "SELECT 1;\n")?;
    std::fs::write(scripts.join("beta.sql"), "SELECT 2;\n## -\nSELECT 3;\n")?;

    let fixture = fixture(
        dir.path(),
        Arc::new(StaticDiscovery {
            snapshot: TopologySnapshot::new(),
        }),
        RecordingExecutor::new(vec![]),
        Some(&scripts),
    );

    let spec = JobSpec::new(
        ScenarioKind::Script,
        None,
        vec![
            "alpha".to_string(),
            "beta".to_string(),
            "missing".to_string(),
        ],
    );
    let out = run_and_consume(&fixture, spec).await;

    assert_eq!(out.completions, vec![true]);
    assert_eq!(out.progress, vec![1, 2, 3]);
    assert!(out.errors.is_empty(), "errors: {:?}", out.errors);
    assert!(out
        .logs
        .iter()
        .any(|line| line.contains("No script named missing")));

    // the scratch database is reset before any statement runs
    let statements = fixture.database.statements();
    assert_eq!(statements[0], "DROP DATABASE IF EXISTS scratch");
    assert_eq!(statements[1], "CREATE DATABASE scratch");

    // one file per script, sharded by fragment index when there are several
    let run_dir = run_dir(&fixture.results_root, "script");
    let alpha = std::fs::read_to_string(run_dir.join("alpha"))?;
    assert!(alpha.contains("ran as root: SELECT 1;"));
    let beta_0 = std::fs::read_to_string(run_dir.join("beta_0"))?;
    assert!(beta_0.contains("SELECT 2;"));
    let beta_1 = std::fs::read_to_string(run_dir.join("beta_1"))?;
    assert!(beta_1.contains("SELECT 3;"));
    assert!(!run_dir.join("missing").exists());

    // the command history is collected into the run directory
    assert!(run_dir.join("history.log").exists());

    // scripts do not end with a dashboard render
    assert_eq!(fixture.renderer.renders.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn failed_discovery_still_delivers_exactly_one_completion() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = fixture(
        dir.path(),
        Arc::new(FailingDiscovery),
        RecordingExecutor::new(vec![]),
        None,
    );

    let spec = JobSpec::new(ScenarioKind::Script, None, vec!["alpha".to_string()]);
    let out = run_and_consume(&fixture, spec).await;

    assert_eq!(out.completions, vec![false]);
    assert!(out
        .errors
        .iter()
        .any(|err| err.contains("Topology discovery failed")));
    assert!(out.progress.is_empty());
    // the run failed before the result directory was created
    assert!(!fixture.results_root.exists());
    Ok(())
}

#[tokio::test]
async fn operator_failures_and_missing_targets_do_not_stop_the_batch() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = fixture(
        dir.path(),
        Arc::new(StaticDiscovery {
            snapshot: storage_snapshot(&[("10.0.0.1", 20160)]),
        }),
        RecordingExecutor::failing_on("sed"),
        None,
    );

    let spec = JobSpec::new(
        ScenarioKind::RecoverSystemd,
        Some(ComponentKind::Storage),
        vec!["10.0.0.1:20160".to_string(), "10.0.0.9:20160".to_string()],
    );
    let out = run_and_consume(&fixture, spec).await;

    // per-target failures are reported, the run itself completes
    assert_eq!(out.completions, vec![true]);
    assert_eq!(out.progress, vec![1, 2]);
    assert!(out
        .errors
        .iter()
        .any(|err| err.contains("recover-systemd against storage 10.0.0.1:20160")));
    assert!(out
        .logs
        .iter()
        .any(|line| line.contains("No storage at 10.0.0.9:20160, skipping")));
    Ok(())
}

#[tokio::test]
async fn component_scenario_without_a_kind_fails_the_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = fixture(
        dir.path(),
        Arc::new(StaticDiscovery {
            snapshot: storage_snapshot(&[("10.0.0.1", 20160)]),
        }),
        RecordingExecutor::new(vec![]),
        None,
    );

    let spec = JobSpec::new(ScenarioKind::RecoverSystemd, None, vec!["10.0.0.1:20160".to_string()]);
    let out = run_and_consume(&fixture, spec).await;

    assert_eq!(out.completions, vec![false]);
    assert!(out
        .errors
        .iter()
        .any(|err| err.contains("needs a component kind")));
    Ok(())
}

#[cfg(target_family = "unix")]
mod unix {
    use super::*;

    #[tokio::test]
    async fn load_bearing_run_tears_down_after_natural_load_exit() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(
            dir.path(),
            Arc::new(StaticDiscovery {
                snapshot: storage_snapshot(&[("10.0.0.1", 20160)]),
            }),
            RecordingExecutor::new(vec![("fuser", "")]),
            None,
        );

        let spec = JobSpec::new(
            ScenarioKind::Kill,
            Some(ComponentKind::Storage),
            vec!["10.0.0.1:20160".to_string()],
        );
        // the load command exits by itself almost immediately; the run must
        // notice and wind down instead of waiting for a cancel
        let out = run_and_consume(&fixture, spec).await;

        assert_eq!(out.completions, vec![true]);
        assert_eq!(out.progress, vec![1]);

        let run_dir = run_dir(&fixture.results_root, "kill");
        let load_log = std::fs::read_to_string(run_dir.join("load.log"))?;
        assert_eq!(load_log.trim(), "load-done");
        assert!(run_dir.join("history.log").exists());

        // fault scenarios end with the dashboard evidence
        assert_eq!(fixture.renderer.renders.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn interrupting_a_run_still_completes_and_collects() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(
            dir.path(),
            Arc::new(StaticDiscovery {
                snapshot: storage_snapshot(&[("10.0.0.1", 20160), ("10.0.0.2", 20160)]),
            }),
            RecordingExecutor::new(vec![("fuser", "")]),
            None,
        );
        // a long pacing gap gives the interrupt something to cut short
        let context = Arc::new(HarnessContext {
            config: test_config(&fixture.results_root, None),
            executor: fixture.context.executor.clone(),
            database: fixture.database.clone(),
            discovery: fixture.context.discovery.clone(),
            renderer: fixture.renderer.clone(),
            load: LoadGenerator::new("sleep 600", 0, 600),
            history_path: fixture.context.history_path.clone(),
        });

        let cancel = CancellationToken::new();
        let spec = JobSpec::new(
            ScenarioKind::Kill,
            Some(ComponentKind::Storage),
            vec!["10.0.0.1:20160".to_string(), "10.0.0.2:20160".to_string()],
        );
        let channels = JobCoordinator::new(context, cancel.clone()).start(spec);

        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();

        let out = tokio::time::timeout(Duration::from_secs(30), consume(channels))
            .await
            .expect("an interrupted run should still wind down");

        assert_eq!(out.completions.len(), 1, "exactly one completion value");
        let run_dir = run_dir(&fixture.results_root, "kill");
        assert!(run_dir.join("history.log").exists());
        Ok(())
    }
}
