/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::Context;
use chrono::Local;
use std::path::{Path, PathBuf};

/// Where one job run writes its artifacts. Every run gets a fresh directory
/// named after the scenario tag and the wall clock, so runs never collide.
pub struct ResultSink {
    dir: PathBuf,
}

impl ResultSink {
    pub fn create(root: &Path, tag: &str) -> anyhow::Result<ResultSink> {
        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let dir = root.join(format!("{}_{}", tag, stamp));
        std::fs::create_dir_all(&dir).context(format!(
            "Unable to create result directory {}",
            dir.display()
        ))?;
        Ok(ResultSink { dir })
    }

    /// Reopens an existing directory, used by tests and by render retries.
    pub fn open(dir: PathBuf) -> ResultSink {
        ResultSink { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for an item's artifact. Items with a single output use the bare
    /// name, sharded outputs get a zero-based index suffix.
    pub fn item_path(&self, name: &str, index: Option<usize>) -> PathBuf {
        match index {
            Some(index) => self.dir.join(format!("{}_{}", name, index)),
            None => self.dir.join(name),
        }
    }

    pub fn load_log_path(&self) -> PathBuf {
        self.dir.join("load.log")
    }

    pub async fn write_item(
        &self,
        name: &str,
        index: Option<usize>,
        contents: &str,
    ) -> anyhow::Result<()> {
        let path = self.item_path(name, index);
        tokio::fs::write(&path, contents)
            .await
            .context(format!("Unable to write result file {}", path.display()))?;
        Ok(())
    }

    /// Copies an external file (the command history log) into the run
    /// directory under its own file name.
    pub fn collect_file(&self, src: &Path) -> anyhow::Result<()> {
        let name = src
            .file_name()
            .context(format!("{} has no file name", src.display()))?;
        std::fs::copy(src, self.dir.join(name)).context(format!(
            "Unable to collect {} into {}",
            src.display(),
            self.dir.display()
        ))?;
        Ok(())
    }
}
