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
use tracing::info;

/// Undoes a crash: restores the automatic restart policy of the target's
/// systemd unit. The process itself is left alone.
pub struct RecoverSystemdOperator {
    target: Target,
    executor: Arc<dyn RemoteExecutor>,
}

impl RecoverSystemdOperator {
    pub fn new(target: Target, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { target, executor }
    }
}

#[async_trait]
impl Operator for RecoverSystemdOperator {
    async fn execute(&self) -> anyhow::Result<()> {
        let port = service_port(self.executor.as_ref(), &self.target).await?;
        let unit = service_unit(self.target.kind, port);

        self.executor
            .set_restart_policy(&self.target.host, &unit, true)
            .await
            .context(format!(
                "Failed to restore restarts for {} {}",
                self.target.kind,
                self.target.address()
            ))?;
        info!(
            "Restart policy restored for {} {}",
            self.target.kind,
            self.target.address()
        );
        Ok(())
    }
}
