/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::Context;
use std::{
    path::Path,
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt},
    process::Command,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Background workload that keeps the cluster busy while faults are
/// injected. The `is_over` flag is written by the generator's own task only,
/// and only when the workload exits by itself.
#[derive(Clone)]
pub struct LoadGenerator {
    command: String,
    interval_minutes: u64,
    pacing: Duration,
    is_over: Arc<AtomicBool>,
}

impl LoadGenerator {
    pub fn new(command: &str, interval_minutes: u64, pacing_secs: u64) -> Self {
        Self {
            command: command.to_string(),
            interval_minutes,
            pacing: Duration::from_secs(pacing_secs),
            is_over: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn interval_minutes(&self) -> u64 {
        self.interval_minutes
    }

    /// Pause between consecutive targets of one batch.
    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    pub fn is_over(&self) -> bool {
        self.is_over.load(Ordering::SeqCst)
    }

    /// Clears the natural-exit flag at the start of a job.
    pub fn reset(&self) {
        self.is_over.store(false, Ordering::SeqCst);
    }

    /// Runs the workload until it exits or the token is cancelled, streaming
    /// its output into the given log file.
    pub async fn run(&self, log_path: &Path, cancel: CancellationToken) -> anyhow::Result<()> {
        let natural = stream_command(&self.command, log_path, cancel).await?;
        if natural {
            self.is_over.store(true, Ordering::SeqCst);
            info!("Load command finished on its own");
        }
        Ok(())
    }
}

/// Runs a shell command with stdout and stderr streamed into a file.
/// Cancellation tears down the whole process group, not just the shell.
/// Returns true when the command ran to its natural exit.
pub async fn stream_command(
    command: &str,
    log_path: &Path,
    cancel: CancellationToken,
) -> anyhow::Result<bool> {
    let file = std::fs::File::create(log_path).context(format!(
        "Unable to create log file {}",
        log_path.display()
    ))?;
    let err_file = file
        .try_clone()
        .context("Unable to clone log file handle")?;

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdout(Stdio::from(file))
        .stderr(Stdio::from(err_file))
        .kill_on_drop(true);
    #[cfg(target_family = "unix")]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .context(format!("Failed to spawn command: {}", command))?;
    let pid = child.id();

    tokio::select! {
        _ = cancel.cancelled() => {
            match pid {
                Some(pid) => terminate_group(pid).await,
                None => {
                    let _ = child.start_kill();
                }
            }
            let _ = child.wait().await;
            Ok(false)
        }
        status = child.wait() => {
            let status = status.context(format!("Failed to wait for command: {}", command))?;
            if !status.success() {
                warn!("Command exited with {}: {}", status, command);
            }
            Ok(true)
        }
    }
}

#[cfg(target_family = "unix")]
async fn terminate_group(pid: u32) {
    // negative pid addresses the whole process group
    let res = Command::new("sh")
        .arg("-c")
        .arg(format!("kill -9 -- -{}", pid))
        .output()
        .await;
    if let Err(err) = res {
        warn!("Failed to stop process group {}\n{}", pid, err);
    }
}

#[cfg(not(target_family = "unix"))]
async fn terminate_group(_pid: u32) {}

/// Follows a log file and forwards complete lines into the channel. Handles
/// the file not existing yet and being truncated underneath it. Runs until
/// the receiver goes away or the surrounding task is cancelled.
pub async fn tail_log(path: &Path, line_tx: mpsc::Sender<String>) {
    let mut offset: u64 = 0;
    let mut partial = String::new();

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;

        let Ok(mut file) = tokio::fs::File::open(path).await else {
            continue;
        };
        let len = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };
        if len < offset {
            // truncated, start over
            offset = 0;
            partial.clear();
        }
        if len == offset {
            continue;
        }
        if file.seek(std::io::SeekFrom::Start(offset)).await.is_err() {
            continue;
        }

        let mut bytes = vec![];
        if file.read_to_end(&mut bytes).await.is_err() {
            continue;
        }
        offset += bytes.len() as u64;
        partial.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(pos) = partial.find('\n') {
            let line = partial[..pos].to_string();
            partial.drain(..=pos);
            if line_tx.send(line).await.is_err() {
                return;
            }
        }
    }
}

/// Emits a once-a-minute countdown into the log channel, then returns.
pub async fn countdown(minutes: u64, what: &str, log_tx: &mpsc::Sender<String>) {
    for remaining in (1..=minutes).rev() {
        let line = format!("{} after {} minutes", what, remaining);
        if log_tx.send(line).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
