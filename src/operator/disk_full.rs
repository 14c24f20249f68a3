/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    operator::{resolve_data_dir, Operator, Target},
    remote::{RemoteCommands, RemoteExecutor},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Job name given to the filler process. The aftercare watcher finds
/// leftover fillers by this name.
const FILLER_NAME: &str = "diskhog";

/// Fills the disk behind a node's data directory with an unbounded write.
/// Execute returns once the filler is launched; a watcher registered on the
/// run token kills the filler and removes the fill file when the job winds
/// down, so the host comes back usable.
pub struct DiskFullOperator {
    target: Target,
    executor: Arc<dyn RemoteExecutor>,
    cancel: CancellationToken,
    cleanup_tasks: Arc<Mutex<JoinSet<()>>>,
}

impl DiskFullOperator {
    pub fn new(
        target: Target,
        executor: Arc<dyn RemoteExecutor>,
        cancel: CancellationToken,
        cleanup_tasks: Arc<Mutex<JoinSet<()>>>,
    ) -> Self {
        Self {
            target,
            executor,
            cancel,
            cleanup_tasks,
        }
    }
}

fn fio_command(fill_path: &str) -> String {
    format!(
        "fio -threads=8 -size=10000G -bs=1m -direct=1 -rw=write -name={} -filename={} -continue_on_error=1",
        FILLER_NAME, fill_path
    )
}

#[async_trait]
impl Operator for DiskFullOperator {
    async fn execute(&self) -> anyhow::Result<()> {
        let data_dir = resolve_data_dir(self.executor.as_ref(), &self.target).await?;
        let fill_path = format!("{}/disk_full", data_dir);

        if let Err(err) = self.executor.install_package(&self.target.host, "fio").await {
            warn!(
                "fio install on {} failed, assuming it is already there\n{}",
                self.target.host, err
            );
        }

        let mut tasks = self
            .cleanup_tasks
            .lock()
            .expect("cleanup task set lock poisoned");

        // the filler runs until the disk is full or aftercare kills it
        let executor = self.executor.clone();
        let host = self.target.host.clone();
        let fill_cmd = fio_command(&fill_path);
        tasks.spawn(async move {
            if let Err(err) = executor.run(&host, &fill_cmd).await {
                debug!("Disk filler on {} finished\n{}", host, err);
            }
        });

        let executor = self.executor.clone();
        let host = self.target.host.clone();
        let cancel = self.cancel.clone();
        tasks.spawn(async move {
            cancel.cancelled().await;
            match executor.process_ids_by_name(&host, FILLER_NAME).await {
                Ok(pids) => {
                    for pid in pids {
                        if let Err(err) = executor.kill9(&host, pid).await {
                            warn!("Failed to kill disk filler {} on {}\n{}", pid, host, err);
                        }
                    }
                }
                Err(err) => warn!("Unable to list disk fillers on {}\n{}", host, err),
            }
            if let Err(err) = executor.remove(&host, &fill_path).await {
                warn!("Failed to remove {} on {}\n{}", fill_path, host, err);
            }
        });

        info!(
            "Filling the disk of {} {} under {}",
            self.target.kind,
            self.target.address(),
            data_dir
        );
        Ok(())
    }
}
