/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod bench;
pub mod clap_args;
pub mod cluster;
pub mod config;
pub mod dashboard;
pub mod database;
pub mod job;
pub mod load_generator;
pub mod operator;
pub mod remote;
pub mod results;
pub mod script;

use crate::{
    cluster::discovery::{ControlPlaneDiscovery, TopologyDiscovery},
    config::Config,
    dashboard::{DashboardRenderer, GrafanaRenderer},
    database::{DatabaseClient, MysqlShell},
    load_generator::LoadGenerator,
    remote::{CommandHistory, RemoteExecutor, SshExecutor},
};
use nanoid::nanoid;
use std::{path::PathBuf, sync::Arc};

/// Everything a job needs to touch the cluster, assembled once from the
/// config. The trait objects keep the job engine runnable against fakes.
pub struct HarnessContext {
    pub config: Config,
    pub executor: Arc<dyn RemoteExecutor>,
    pub database: Arc<dyn DatabaseClient>,
    pub discovery: Arc<dyn TopologyDiscovery>,
    pub renderer: Arc<dyn DashboardRenderer>,
    pub load: LoadGenerator,
    /// Every remote command of the run lands here, collected into the
    /// result directory at the end.
    pub history_path: PathBuf,
}

impl HarnessContext {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let history_path = std::env::temp_dir().join(format!(
            "shakedown-{}.log",
            nanoid!(5, &nanoid::alphabet::SAFE)
        ));
        let history = CommandHistory::start(history_path.clone())?;

        let executor = SshExecutor::new(&config.ssh.user, config.ssh.port, history);
        let database = MysqlShell::new(
            &config.database.host,
            config.database.port,
            &config.database.user,
            &config.database.password,
        );
        let discovery = ControlPlaneDiscovery::new(&config.cluster.entry);
        let renderer = GrafanaRenderer::new(
            &config.dashboard.user,
            &config.dashboard.password,
            config.load.interval_minutes,
        )?;
        let load = LoadGenerator::new(
            &config.load.command,
            config.load.interval_minutes,
            config.load.pacing_secs,
        );

        Ok(Self {
            config,
            executor: Arc::new(executor),
            database: Arc::new(database),
            discovery: Arc::new(discovery),
            renderer: Arc::new(renderer),
            load,
            history_path,
        })
    }
}
