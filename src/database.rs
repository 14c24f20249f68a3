/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio::process::Command;

/// Database every scenario runs against. It is dropped and recreated at the
/// start of each job, so nothing in it survives a run.
pub const SCRATCH_DB: &str = "scratch";

/// Output of one statement batch. A failing statement is captured here
/// instead of failing the call, the harness treats it as part of the result.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlOutput {
    pub lines: Vec<String>,
    pub error: Option<String>,
}

impl SqlOutput {
    /// Renders the output the way it is written into a result file.
    pub fn into_contents(self) -> String {
        let mut contents = self.lines.join("\n");
        if let Some(err) = self.error {
            if !contents.is_empty() {
                contents.push('\n');
            }
            contents.push_str(&format!("[error] {}", err));
        }
        contents
    }
}

#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Runs SQL with admin credentials. Statement failure is a hard error.
    async fn execute(&self, sql: &str) -> anyhow::Result<Vec<String>>;

    /// Runs SQL under the given credentials against the scratch database,
    /// capturing statement failure in the output instead of returning it.
    /// Only infrastructure failure (the client itself cannot run) is an Err.
    async fn execute_captured(
        &self,
        sql: &str,
        user: &str,
        password: &str,
    ) -> anyhow::Result<SqlOutput>;

    /// Drops and recreates the scratch database. Safe to call on a cluster
    /// that never had one.
    async fn reset_scratch(&self) -> anyhow::Result<()> {
        self.execute(&format!("DROP DATABASE IF EXISTS {}", SCRATCH_DB))
            .await
            .context("Failed to drop the scratch database")?;
        self.execute(&format!("CREATE DATABASE {}", SCRATCH_DB))
            .await
            .context("Failed to create the scratch database")?;
        Ok(())
    }
}

/// Client that drives the stock mysql command line tool. Verbose mode is on
/// for captured batches so result files show each statement next to its
/// output.
pub struct MysqlShell {
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl MysqlShell {
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    fn base_command(&self, user: &str, password: &str) -> Command {
        let mut cmd = Command::new("mysql");
        cmd.arg("-h")
            .arg(&self.host)
            .arg("-P")
            .arg(self.port.to_string())
            .arg("-u")
            .arg(user)
            .kill_on_drop(true);
        if !password.is_empty() {
            cmd.arg(format!("-p{}", password));
        }
        cmd
    }
}

#[async_trait]
impl DatabaseClient for MysqlShell {
    async fn execute(&self, sql: &str) -> anyhow::Result<Vec<String>> {
        let output = self
            .base_command(&self.user, &self.password)
            .arg("--comments")
            .arg("-e")
            .arg(sql)
            .output()
            .await
            .context("Failed to run the mysql client, is it installed?")?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout.lines().map(|line| line.to_string()).collect())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(anyhow!("Statement failed: {}\n{}", sql, stderr.trim()))
        }
    }

    async fn execute_captured(
        &self,
        sql: &str,
        user: &str,
        password: &str,
    ) -> anyhow::Result<SqlOutput> {
        let output = self
            .base_command(user, password)
            .arg("-vvv")
            .arg("--comments")
            .arg("--database")
            .arg(SCRATCH_DB)
            .arg("-e")
            .arg(sql)
            .output()
            .await
            .context("Failed to run the mysql client, is it installed?")?;

        let lines = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.to_string())
            .collect();
        let error = if output.status.success() {
            None
        } else {
            Some(String::from_utf8_lossy(&output.stderr).trim().to_string())
        };
        Ok(SqlOutput { lines, error })
    }
}
