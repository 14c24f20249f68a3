/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::Context;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

static EXAMPLE_CONFIG: &str = include_str!("templates/shakedown.toml");

/// One config file describes one cluster. Required sections cover the SQL
/// entry, the remote account, the cluster itself and the background load;
/// the rest falls back to defaults.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ssh: SshConfig,
    pub cluster: ClusterConfig,
    pub load: LoadConfig,
    #[serde(default)]
    pub scripts: ScriptsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub results: ResultsConfig,
}

impl Config {
    pub fn write_example_to_file(path: &Path) -> anyhow::Result<File> {
        let mut file = File::create_new(path)?;
        File::write_all(&mut file, EXAMPLE_CONFIG.as_bytes())?;
        Ok(file)
    }

    pub fn try_from_path(path: &Path) -> anyhow::Result<Config> {
        let mut config_str = String::new();
        fs::File::open(path)
            .context(format!("Unable to open config file {}", path.display()))?
            .read_to_string(&mut config_str)?;
        Config::try_from_str(&config_str)
    }

    pub fn try_from_str(conf_str: &str) -> anyhow::Result<Config> {
        toml::from_str::<Config>(conf_str).map_err(|e| anyhow::anyhow!("TOML parsing error: {}", e))
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_database_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Second account the safety scripts switch to.
    #[serde(default = "default_app_user")]
    pub app_user: String,
    #[serde(default)]
    pub app_password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SshConfig {
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub name: String,
    /// Any placement authority member; the REST api and the coordination
    /// store gateway are served on this address.
    pub entry: String,
    #[serde(default = "default_ctl")]
    pub ctl: String,
    /// Storage label that defines a failure domain for the disaster
    /// scenario.
    #[serde(default = "default_disaster_label")]
    pub disaster_label: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoadConfig {
    pub command: String,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_pacing_secs")]
    pub pacing_secs: u64,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ScriptsConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_user")]
    pub user: String,
    #[serde(default = "default_dashboard_user")]
    pub password: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            user: default_dashboard_user(),
            password: default_dashboard_user(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ResultsConfig {
    #[serde(default = "default_results_root")]
    pub root: String,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            root: default_results_root(),
        }
    }
}

fn default_database_port() -> u16 {
    4000
}

fn default_app_user() -> String {
    "app_user".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ctl() -> String {
    "clusterctl".to_string()
}

fn default_disaster_label() -> String {
    "zone".to_string()
}

fn default_interval_minutes() -> u64 {
    10
}

fn default_pacing_secs() -> u64 {
    30
}

fn default_dashboard_user() -> String {
    "admin".to_string()
}

fn default_results_root() -> String {
    "./result".to_string()
}

/// Writes the example config into the working directory for the user to
/// edit. Refuses to clobber an existing one.
pub fn init_config() {
    match Config::write_example_to_file(Path::new("./shakedown.toml")) {
        Ok(_) => {
            println!("{}", "shakedown.toml created!".green());
            println!(
                "{}",
                "Point [cluster] entry at a placement authority member and adjust the rest."
                    .yellow()
            );
        }

        Err(err) => {
            println!("{}\n{}", "Error creating config.".red(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    static MINIMAL_CONFIG: &str = r#"
        [database]
        host = "10.0.0.5"
        user = "root"

        [ssh]
        user = "deploy"

        [cluster]
        name = "testbed"
        entry = "10.0.0.1:2379"

        [load]
        command = "sysbench oltp_read_write run"
    "#;

    #[test]
    fn can_load_config_file() -> anyhow::Result<()> {
        Config::try_from_path(Path::new("./fixtures/shakedown.success.toml"))?;
        Ok(())
    }

    #[test]
    fn example_config_parses() -> anyhow::Result<()> {
        let cfg = Config::try_from_str(EXAMPLE_CONFIG)?;
        assert_eq!(cfg.database.port, 4000);
        assert_eq!(cfg.cluster.ctl, "clusterctl");
        Ok(())
    }

    #[test]
    fn defaults_fill_the_optional_sections() -> anyhow::Result<()> {
        let cfg = Config::try_from_str(MINIMAL_CONFIG)?;
        assert_eq!(cfg.database.port, 4000);
        assert_eq!(cfg.database.app_user, "app_user");
        assert_eq!(cfg.ssh.port, 22);
        assert_eq!(cfg.cluster.disaster_label, "zone");
        assert_eq!(cfg.load.interval_minutes, 10);
        assert_eq!(cfg.load.pacing_secs, 30);
        assert!(cfg.scripts.dir.is_none());
        assert_eq!(cfg.dashboard.user, "admin");
        assert_eq!(cfg.results.root, "./result");
        Ok(())
    }

    #[test]
    fn missing_required_sections_fail() {
        let res = Config::try_from_str("[ssh]\nuser = \"deploy\"\n");
        assert!(res.is_err());
    }
}
