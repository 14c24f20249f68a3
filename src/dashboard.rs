/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::cluster::{ComponentKind, TopologySnapshot};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use nanoid::nanoid;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Catalog of panels worth keeping as evidence, embedded alongside the
/// binary. A panel with no tags is captured for every rendering scenario.
const PANEL_CATALOG: &str = include_str!("templates/panels.toml");

/// Prefix of the api keys the renderer issues. Revocation matches on the
/// prefix so keys leaked by an interrupted run are cleaned up too.
const KEY_PREFIX: &str = "shakedown-";

#[async_trait]
pub trait DashboardRenderer: Send + Sync {
    /// Captures the panels relevant to a scenario into the result directory.
    async fn render(
        &self,
        snapshot: &TopologySnapshot,
        result_dir: &Path,
        tag: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Panel {
    pub name: String,
    pub dashboard: String,
    pub page: String,
    pub id: u32,
    #[serde(default = "default_org")]
    pub org: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_org() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct PanelCatalog {
    #[serde(default)]
    panels: Vec<Panel>,
}

pub fn builtin_panels() -> anyhow::Result<Vec<Panel>> {
    let catalog: PanelCatalog =
        toml::from_str(PANEL_CATALOG).context("Error parsing the panel catalog")?;
    Ok(catalog.panels)
}

fn panels_for_tag<'a>(panels: &'a [Panel], tag: &str) -> Vec<&'a Panel> {
    panels
        .iter()
        .filter(|panel| panel.tags.is_empty() || panel.tags.iter().any(|t| t == tag))
        .collect()
}

fn render_url(base: &str, panel: &Panel, from_ms: i64, to_ms: i64) -> String {
    format!(
        "{}/render/d-solo/{}/{}?orgId={}&panelId={}&from={}&to={}&width=1000&height=500",
        base, panel.dashboard, panel.page, panel.org, panel.id, from_ms, to_ms
    )
}

/// Renders panels through the dashboard service's image renderer. A run
/// scoped admin key is issued for the render calls and revoked afterwards.
pub struct GrafanaRenderer {
    client: reqwest::Client,
    user: String,
    password: String,
    window_minutes: u64,
    panels: Vec<Panel>,
}

impl GrafanaRenderer {
    pub fn new(user: &str, password: &str, window_minutes: u64) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            user: user.to_string(),
            password: password.to_string(),
            window_minutes,
            panels: builtin_panels()?,
        })
    }

    async fn issue_key(&self, base: &str) -> anyhow::Result<String> {
        let name = format!("{}{}", KEY_PREFIX, nanoid!(5, &nanoid::alphabet::SAFE));
        let body = serde_json::json!({ "name": name, "role": "Admin" });
        let resp: IssuedKeyDto = self
            .client
            .post(format!("{}/api/auth/keys", base))
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await?
            .json()
            .await
            .context("Error issuing a dashboard api key")?;
        Ok(resp.key)
    }

    async fn capture(&self, url: &str, key: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(key)
            .send()
            .await?
            .error_for_status()
            .context("Render request rejected")?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn revoke_keys(&self, base: &str) -> anyhow::Result<()> {
        let keys: Vec<ApiKeyDto> = self
            .client
            .get(format!("{}/api/auth/keys", base))
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?
            .json()
            .await
            .context("Error listing dashboard api keys")?;
        for key in keys.into_iter().filter(|key| key.name.starts_with(KEY_PREFIX)) {
            self.client
                .delete(format!("{}/api/auth/keys/{}", base, key.id))
                .basic_auth(&self.user, Some(&self.password))
                .send()
                .await
                .context(format!("Error revoking dashboard api key {}", key.name))?;
        }
        Ok(())
    }
}

#[async_trait]
impl DashboardRenderer for GrafanaRenderer {
    async fn render(
        &self,
        snapshot: &TopologySnapshot,
        result_dir: &Path,
        tag: &str,
    ) -> anyhow::Result<()> {
        let dashboard = snapshot
            .instances(ComponentKind::Dashboard)
            .first()
            .context("No dashboard service in the topology")?;
        let base = format!("http://{}", dashboard.address());

        let panels = panels_for_tag(&self.panels, tag);
        if panels.is_empty() {
            info!("No panels to capture for {}", tag);
            return Ok(());
        }

        let key = self.issue_key(&base).await?;
        let to = Utc::now().timestamp_millis();
        let from = to - ((self.window_minutes + 10) * 60_000) as i64;

        for panel in panels {
            let url = render_url(&base, panel, from, to);
            match self.capture(&url, &key).await {
                Ok(bytes) => {
                    let path = result_dir.join(format!("{}_{}.png", tag, panel.name));
                    if let Err(err) = tokio::fs::write(&path, bytes).await {
                        warn!("Unable to save panel {}\n{}", panel.name, err);
                    }
                }
                Err(err) => warn!("Unable to render panel {}\n{}", panel.name, err),
            }
        }

        if let Err(err) = self.revoke_keys(&base).await {
            warn!("Dashboard api key cleanup failed\n{}", err);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct IssuedKeyDto {
    key: String,
}

#[derive(Debug, Deserialize)]
struct ApiKeyDto {
    id: u64,
    name: String,
}
