/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::{io::AsyncWriteExt, process::Command, sync::mpsc, task::JoinHandle};

/// Runs shell commands on cluster hosts or on the harness host itself.
/// Everything an operator does to the cluster goes through this seam, which
/// is what makes fault injection testable without a cluster.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs a command on the given host and returns its stdout. A non-zero
    /// exit is an error carrying the command's stderr.
    async fn run(&self, host: &str, cmd: &str) -> anyhow::Result<String>;

    /// Runs a command locally. The command is split into POSIX words, no
    /// shell is involved.
    async fn run_local(&self, cmd: &str) -> anyhow::Result<String>;
}

/// Session-wide log of every command the harness issued. Lines flow through
/// a bounded channel into a single writer task so that concurrent workers
/// never interleave partial lines.
pub struct CommandHistory {
    tx: mpsc::Sender<String>,
    path: PathBuf,
    handle: JoinHandle<()>,
}

impl CommandHistory {
    pub fn start(path: PathBuf) -> anyhow::Result<Self> {
        std::fs::File::create(&path).context(format!(
            "Unable to create command history log {}",
            path.display()
        ))?;

        let (tx, mut rx) = mpsc::channel::<String>(256);
        let log_path = path.clone();
        let handle = tokio::spawn(async move {
            let file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&log_path)
                .await;
            let mut file = match file {
                Ok(file) => file,
                Err(err) => {
                    tracing::warn!(
                        "Unable to open command history log {}\n{}",
                        log_path.display(),
                        err
                    );
                    return;
                }
            };
            while let Some(line) = rx.recv().await {
                if let Err(err) = file.write_all(format!("{}\n", line).as_bytes()).await {
                    tracing::warn!("Unable to write command history line\n{}", err);
                }
            }
            let _ = file.flush().await;
        });

        Ok(Self { tx, path, handle })
    }

    pub async fn record(&self, line: String) {
        // the writer going away only loses history, never fails a command
        let _ = self.tx.send(line).await;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drains outstanding lines and waits for the writer to finish.
    pub async fn close(self) -> anyhow::Result<()> {
        drop(self.tx);
        self.handle.await.context("History writer task panicked")?;
        Ok(())
    }
}

fn history_line(target: &str, cmd: &str) -> String {
    format!("{} | [{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), target, cmd)
}

/// Executor that shells out to the system ssh client. Remote commands run
/// under the configured user, the remote shell takes care of pipelines.
pub struct SshExecutor {
    user: String,
    port: u16,
    history: CommandHistory,
}

impl SshExecutor {
    pub fn new(user: &str, port: u16, history: CommandHistory) -> Self {
        Self {
            user: user.to_string(),
            port,
            history,
        }
    }

    pub fn history_path(&self) -> &Path {
        self.history.path()
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, cmd: &str) -> anyhow::Result<String> {
        self.history.record(history_line(host, cmd)).await;

        let output = Command::new("ssh")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-p")
            .arg(self.port.to_string())
            .arg(format!("{}@{}", self.user, host))
            .arg(cmd)
            .kill_on_drop(true)
            .output()
            .await
            .context(format!("Failed to reach {} over ssh", host))?;
        collect_output(output, &format!("{} on {}", cmd, host))
    }

    async fn run_local(&self, cmd: &str) -> anyhow::Result<String> {
        self.history.record(history_line("local", cmd)).await;
        run_local_command(cmd).await
    }
}

pub(crate) async fn run_local_command(cmd: &str) -> anyhow::Result<String> {
    // break command string into POSIX words
    let words = shlex::split(cmd).context("Command string is not POSIX compliant")?;

    match &words[..] {
        [command, args @ ..] => {
            let output = Command::new(command)
                .args(args)
                .kill_on_drop(true)
                .output()
                .await
                .context(format!("Failed to run {}", command))?;
            collect_output(output, cmd)
        }
        _ => Err(anyhow!("Empty command")),
    }
}

fn collect_output(output: std::process::Output, what: &str) -> anyhow::Result<String> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(anyhow!("Command failed ({})\n{}", what, stderr.trim()))
    }
}

/// The command vocabulary the harness speaks on cluster hosts, layered over
/// any executor.
#[async_trait]
pub trait RemoteCommands: RemoteExecutor {
    /// Pid of the process listening on the given TCP port, if any.
    async fn process_id_by_port(&self, host: &str, port: u16) -> anyhow::Result<Option<u32>> {
        let out = self
            .run(host, &format!("sudo fuser -n tcp {}/tcp | tail -n 1", port))
            .await?;
        Ok(out.split_whitespace().last().and_then(|pid| pid.parse().ok()))
    }

    /// Pids of processes whose command line matches the given pattern.
    async fn process_ids_by_name(&self, host: &str, pattern: &str) -> anyhow::Result<Vec<u32>> {
        let out = self
            .run(
                host,
                &format!("ps -ef | grep {} | grep -v grep | awk '{{print $2}}'", pattern),
            )
            .await?;
        Ok(out
            .split_whitespace()
            .filter_map(|pid| pid.parse().ok())
            .collect())
    }

    async fn kill9(&self, host: &str, pid: u32) -> anyhow::Result<()> {
        self.run(host, &format!("sudo kill -9 {}", pid)).await?;
        Ok(())
    }

    async fn rename(&self, host: &str, from: &str, to: &str) -> anyhow::Result<()> {
        self.run(host, &format!("sudo mv {} {}", from, to)).await?;
        Ok(())
    }

    async fn remove(&self, host: &str, path: &str) -> anyhow::Result<()> {
        self.run(host, &format!("sudo rm -rf {}", path)).await?;
        Ok(())
    }

    /// Flips the restart policy of a systemd unit between always and no,
    /// then reloads the daemon so the change takes effect.
    async fn set_restart_policy(&self, host: &str, unit_file: &str, auto: bool) -> anyhow::Result<()> {
        let sed = if auto {
            format!("sudo sed -i 's/Restart=no/Restart=always/g' {}", unit_file)
        } else {
            format!("sudo sed -i 's/Restart=always/Restart=no/g' {}", unit_file)
        };
        self.run(host, &sed).await?;
        self.run(host, "sudo systemctl daemon-reload").await?;
        Ok(())
    }

    /// First match of a Perl-style pattern in a remote file.
    async fn grep_value(&self, host: &str, pattern: &str, file: &str) -> anyhow::Result<String> {
        let out = self
            .run(host, &format!("grep -oP -- '{}' {}", pattern, file))
            .await?;
        Ok(out.trim().to_string())
    }

    async fn install_package(&self, host: &str, package: &str) -> anyhow::Result<()> {
        self.run(host, &format!("sudo yum install -y {}", package))
            .await?;
        Ok(())
    }
}

impl<T: RemoteExecutor + ?Sized> RemoteCommands for T {}
