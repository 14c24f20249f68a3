/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    operator::{service_port, service_unit, Operator, Target},
    remote::{RemoteCommands, RemoteExecutor},
};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Takes a node down and keeps it down: the systemd unit stops restarting
/// the process before the process is killed. The policy change must stick,
/// the kill itself is best effort.
pub struct CrashOperator {
    target: Target,
    executor: Arc<dyn RemoteExecutor>,
}

impl CrashOperator {
    pub fn new(target: Target, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { target, executor }
    }
}

#[async_trait]
impl Operator for CrashOperator {
    async fn execute(&self) -> anyhow::Result<()> {
        let port = service_port(self.executor.as_ref(), &self.target).await?;
        let unit = service_unit(self.target.kind, port);

        self.executor
            .set_restart_policy(&self.target.host, &unit, false)
            .await
            .context(format!(
                "Failed to disable restarts for {} {}",
                self.target.kind,
                self.target.address()
            ))?;

        match self.executor.process_id_by_port(&self.target.host, port).await {
            Ok(Some(pid)) => {
                if let Err(err) = self.executor.kill9(&self.target.host, pid).await {
                    warn!(
                        "Failed to kill pid {} of {} {}\n{}",
                        pid,
                        self.target.kind,
                        self.target.address(),
                        err
                    );
                } else {
                    info!(
                        "Crashed {} {} (pid {})",
                        self.target.kind,
                        self.target.address(),
                        pid
                    );
                }
            }
            Ok(None) => warn!(
                "Nothing is listening on {} {}",
                self.target.kind,
                self.target.address()
            ),
            Err(err) => warn!(
                "Unable to look up the pid of {} {}\n{}",
                self.target.kind,
                self.target.address(),
                err
            ),
        }
        Ok(())
    }
}
