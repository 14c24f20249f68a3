/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    operator::{Operator, Target},
    remote::RemoteExecutor,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Reboots the host under a node. The ssh session dies with the host, so
/// a command failure here is the expected outcome, not an error.
pub struct RebootOperator {
    target: Target,
    executor: Arc<dyn RemoteExecutor>,
}

impl RebootOperator {
    pub fn new(target: Target, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { target, executor }
    }
}

#[async_trait]
impl Operator for RebootOperator {
    async fn execute(&self) -> anyhow::Result<()> {
        info!(
            "Rebooting the host of {} {}",
            self.target.kind,
            self.target.address()
        );
        if let Err(err) = self.executor.run(&self.target.host, "sudo reboot").await {
            warn!("Reboot of {} dropped the session\n{}", self.target.host, err);
        }
        Ok(())
    }
}
