/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    operator::{Operator, Target},
    remote::{RemoteCommands, RemoteExecutor},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Force-kills the process listening on the target's port. Best effort all
/// the way: an unreachable host or an already dead process is a success with
/// a warning, because the point of the scenario is a cluster missing this
/// node either way.
pub struct KillOperator {
    target: Target,
    executor: Arc<dyn RemoteExecutor>,
}

impl KillOperator {
    pub fn new(target: Target, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { target, executor }
    }
}

#[async_trait]
impl Operator for KillOperator {
    async fn execute(&self) -> anyhow::Result<()> {
        let pid = match self
            .executor
            .process_id_by_port(&self.target.host, self.target.port)
            .await
        {
            Ok(pid) => pid,
            Err(err) => {
                warn!(
                    "Unable to reach {} {}\n{}",
                    self.target.kind,
                    self.target.address(),
                    err
                );
                return Ok(());
            }
        };

        match pid {
            Some(pid) => {
                if let Err(err) = self.executor.kill9(&self.target.host, pid).await {
                    warn!(
                        "Failed to kill pid {} of {} {}\n{}",
                        pid,
                        self.target.kind,
                        self.target.address(),
                        err
                    );
                } else {
                    info!("Killed {} {} (pid {})", self.target.kind, self.target.address(), pid);
                }
            }
            None => warn!(
                "Nothing is listening on {} {}",
                self.target.kind,
                self.target.address()
            ),
        }
        Ok(())
    }
}
