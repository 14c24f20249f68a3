/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    operator::{service_port, Operator, Target},
    remote::RemoteExecutor,
};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Removes a node from the cluster through the deployment tool. The tool
/// handles region migration itself, so this is a single local command.
pub struct ScaleInOperator {
    target: Target,
    executor: Arc<dyn RemoteExecutor>,
    cluster_name: String,
    ctl: String,
}

impl ScaleInOperator {
    pub fn new(
        target: Target,
        executor: Arc<dyn RemoteExecutor>,
        cluster_name: &str,
        ctl: &str,
    ) -> Self {
        Self {
            target,
            executor,
            cluster_name: cluster_name.to_string(),
            ctl: ctl.to_string(),
        }
    }
}

#[async_trait]
impl Operator for ScaleInOperator {
    async fn execute(&self) -> anyhow::Result<()> {
        // columnar ports drift after restarts, resolve right before use
        let port = service_port(self.executor.as_ref(), &self.target).await?;
        let command = format!(
            "{} cluster scale-in {} -N {}:{} --yes",
            self.ctl, self.cluster_name, self.target.host, port
        );
        let output = self
            .executor
            .run_local(&command)
            .await
            .with_context(|| format!("scale-in of {}:{} failed", self.target.host, port))?;
        info!(
            "Scaled in {} {}:{}\n{}",
            self.target.kind, self.target.host, port, output
        );
        Ok(())
    }
}
