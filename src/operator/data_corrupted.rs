/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    operator::{resolve_data_dir, Operator, Target},
    remote::{RemoteCommands, RemoteExecutor},
};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Makes a node's data disappear by renaming its data directory. The rename
/// keeps the bytes recoverable while looking like data loss to the cluster.
/// Only kinds with a known data directory layout are supported, anything
/// else fails before a single remote command runs.
pub struct DataCorruptedOperator {
    target: Target,
    executor: Arc<dyn RemoteExecutor>,
}

impl DataCorruptedOperator {
    pub fn new(target: Target, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { target, executor }
    }
}

#[async_trait]
impl Operator for DataCorruptedOperator {
    async fn execute(&self) -> anyhow::Result<()> {
        let data_dir = resolve_data_dir(self.executor.as_ref(), &self.target).await?;
        let backup = format!("{}_bak", data_dir);

        self.executor
            .rename(&self.target.host, &data_dir, &backup)
            .await
            .context(format!(
                "Failed to move the data directory of {} {}",
                self.target.kind,
                self.target.address()
            ))?;
        info!(
            "Moved {} to {} on {} {}",
            data_dir,
            backup,
            self.target.kind,
            self.target.address()
        );
        Ok(())
    }
}
