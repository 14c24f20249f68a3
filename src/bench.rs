/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{database::SCRATCH_DB, remote::RemoteExecutor};
use anyhow::Context;

/// Builder for sysbench oltp command lines against the scratch database.
#[derive(Debug, Clone)]
pub struct SysbenchSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub tables: u32,
    pub table_size: u64,
    pub threads: u32,
    pub time_secs: u64,
}

impl SysbenchSpec {
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            tables: 4,
            table_size: 100_000,
            threads: 8,
            time_secs: 600,
        }
    }

    fn mysql_flags(&self) -> String {
        let mut flags = format!(
            "--mysql-host={} --mysql-port={} --mysql-user={} --mysql-db={}",
            self.host, self.port, self.user, SCRATCH_DB
        );
        if !self.password.is_empty() {
            flags.push_str(&format!(" --mysql-password={}", self.password));
        }
        flags
    }

    pub fn prepare_command(&self) -> String {
        format!(
            "sysbench oltp_read_write {} --tables={} --table-size={} --threads={} prepare",
            self.mysql_flags(),
            self.tables,
            self.table_size,
            self.threads
        )
    }

    pub fn run_command(&self) -> String {
        format!(
            "sysbench oltp_read_write {} --tables={} --table-size={} --threads={} --time={} --report-interval=10 run",
            self.mysql_flags(),
            self.tables,
            self.table_size,
            self.threads,
            self.time_secs
        )
    }
}

/// Builder for tpcc loads driven through the cluster management tool.
#[derive(Debug, Clone)]
pub struct TpccSpec {
    pub ctl: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub warehouses: u32,
    pub threads: u32,
}

impl TpccSpec {
    pub fn new(ctl: &str, host: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            ctl: ctl.to_string(),
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            warehouses: 10,
            threads: 8,
        }
    }

    fn command(&self, action: &str) -> String {
        let mut cmd = format!(
            "{} bench tpcc --host {} --port {} --user {} --db {} --warehouses {} --threads {}",
            self.ctl, self.host, self.port, self.user, SCRATCH_DB, self.warehouses, self.threads
        );
        if !self.password.is_empty() {
            cmd.push_str(&format!(" --password {}", self.password));
        }
        format!("{} {}", cmd, action)
    }

    pub fn clean_command(&self) -> String {
        self.command("clean")
    }

    pub fn prepare_command(&self) -> String {
        self.command("prepare")
    }
}

/// Makes sure sysbench is available on the harness host, installing it when
/// it is missing.
pub async fn ensure_sysbench(executor: &dyn RemoteExecutor) -> anyhow::Result<()> {
    if executor.run_local("sysbench --version").await.is_ok() {
        return Ok(());
    }
    executor
        .run_local("sudo yum install -y sysbench")
        .await
        .context("sysbench is missing and could not be installed")?;
    Ok(())
}
