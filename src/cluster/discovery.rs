/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::cluster::{parse_address, ComponentInstance, ComponentKind, TopologySnapshot};
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::collections::HashMap;

/// Label that marks a store as a columnar node. Columnar stores are listed by
/// the same endpoint as row stores and are split out by this label.
const ENGINE_LABEL: &str = "engine";
const ENGINE_COLUMNAR: &str = "columnar";

const FRONTEND_PREFIX: &str = "/topology/frontend/";
const DASHBOARD_KEY: &str = "/topology/dashboard";

#[async_trait]
pub trait TopologyDiscovery: Send + Sync {
    /// Builds a fresh snapshot of the whole cluster. Any failing sub-query
    /// fails the snapshot, there is no partial topology.
    async fn discover(&self) -> anyhow::Result<TopologySnapshot>;
}

/// Discovers topology through the control plane: component REST endpoints
/// for members and stores, and the coordination store (exposed as a JSON
/// key-value gateway on the same entry address) for frontends and the
/// dashboard.
pub struct ControlPlaneDiscovery {
    client: reqwest::Client,
    entry: String,
}

impl ControlPlaneDiscovery {
    pub fn new(entry: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            entry: entry.to_string(),
        }
    }

    async fn fetch_members(&self) -> anyhow::Result<Vec<ComponentInstance>> {
        let url = format!("http://{}/api/v1/members", self.entry);
        let raw = self
            .client
            .get(&url)
            .send()
            .await?
            .text()
            .await
            .context("Error fetching placement members")?;
        members_from_json(&raw)
    }

    async fn fetch_stores(
        &self,
    ) -> anyhow::Result<(Vec<ComponentInstance>, Vec<ComponentInstance>)> {
        let url = format!("http://{}/api/v1/stores", self.entry);
        let raw = self
            .client
            .get(&url)
            .send()
            .await?
            .text()
            .await
            .context("Error fetching stores")?;
        stores_from_json(&raw)
    }

    async fn fetch_frontends(&self) -> anyhow::Result<Vec<ComponentInstance>> {
        let kvs = self.kv_range_prefix(FRONTEND_PREFIX).await?;
        let mut frontends = vec![];
        for (key, value) in kvs {
            if let Some(frontend) = frontend_from_kv(&key, &value)? {
                frontends.push(frontend);
            }
        }
        Ok(frontends)
    }

    async fn fetch_dashboard(&self) -> anyhow::Result<Vec<ComponentInstance>> {
        match self.kv_get(DASHBOARD_KEY).await? {
            Some(raw) => Ok(vec![dashboard_from_json(&raw)?]),
            None => Ok(vec![]),
        }
    }

    /// Reads all keys under a prefix from the coordination store gateway.
    async fn kv_range_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, String)>> {
        let body = serde_json::json!({
            "key": STANDARD.encode(prefix),
            "range_end": STANDARD.encode(prefix_range_end(prefix.as_bytes())),
        });
        self.kv_range(body).await
    }

    async fn kv_get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let body = serde_json::json!({ "key": STANDARD.encode(key) });
        let kvs = self.kv_range(body).await?;
        Ok(kvs.into_iter().next().map(|(_, value)| value))
    }

    async fn kv_range(&self, body: serde_json::Value) -> anyhow::Result<Vec<(String, String)>> {
        let url = format!("http://{}/v3/kv/range", self.entry);
        let resp: RangeResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .json()
            .await
            .context("Error reading from the coordination store")?;

        let mut kvs = vec![];
        for kv in resp.kvs {
            let key = STANDARD.decode(&kv.key).context("Bad key encoding")?;
            let value = STANDARD.decode(&kv.value).context("Bad value encoding")?;
            kvs.push((
                String::from_utf8_lossy(&key).to_string(),
                String::from_utf8_lossy(&value).to_string(),
            ));
        }
        Ok(kvs)
    }
}

#[async_trait]
impl TopologyDiscovery for ControlPlaneDiscovery {
    async fn discover(&self) -> anyhow::Result<TopologySnapshot> {
        let mut snapshot = TopologySnapshot::new();

        let frontends = self.fetch_frontends().await?;
        snapshot.insert(ComponentKind::Frontend, frontends);

        let (stores, columnar) = self.fetch_stores().await?;
        snapshot.insert(ComponentKind::Storage, stores);
        snapshot.insert(ComponentKind::ColumnarStorage, columnar);

        let members = self.fetch_members().await?;
        snapshot.insert(ComponentKind::PlacementAuthority, members);

        let dashboard = self.fetch_dashboard().await?;
        snapshot.insert(ComponentKind::Dashboard, dashboard);

        Ok(snapshot)
    }
}

/// First key after the prefix range, per coordination store range semantics.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KvDto>,
}

#[derive(Debug, Deserialize)]
struct KvDto {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<MemberDto>,
    leader: Option<LeaderDto>,
}

#[derive(Debug, Deserialize)]
struct MemberDto {
    name: String,
    client_urls: Vec<String>,
    #[serde(default)]
    deploy_path: String,
}

#[derive(Debug, Deserialize)]
struct LeaderDto {
    name: String,
}

fn members_from_json(raw: &str) -> anyhow::Result<Vec<ComponentInstance>> {
    let resp: MembersResponse =
        serde_json::from_str(raw).context("Error parsing placement members")?;
    let leader_name = resp.leader.map(|leader| leader.name);

    let mut members = vec![];
    for member in resp.members {
        let client_url = member
            .client_urls
            .first()
            .context(format!("Member {} has no client url", member.name))?;
        let addr = client_url
            .trim_start_matches("http://")
            .trim_start_matches("https://");
        let (host, port) = parse_address(addr)?;
        members.push(ComponentInstance {
            host,
            port,
            status_port: None,
            deploy_path: member.deploy_path,
            labels: HashMap::new(),
            is_leader: leader_name.as_deref() == Some(member.name.as_str()),
        });
    }
    Ok(members)
}

#[derive(Debug, Deserialize)]
struct StoresResponse {
    #[serde(default)]
    stores: Vec<StoreWrapperDto>,
}

#[derive(Debug, Deserialize)]
struct StoreWrapperDto {
    store: StoreDto,
}

#[derive(Debug, Deserialize)]
struct StoreDto {
    address: String,
    #[serde(default)]
    status_address: Option<String>,
    #[serde(default)]
    deploy_path: String,
    #[serde(default)]
    labels: Vec<LabelDto>,
}

#[derive(Debug, Deserialize)]
struct LabelDto {
    key: String,
    value: String,
}

fn stores_from_json(
    raw: &str,
) -> anyhow::Result<(Vec<ComponentInstance>, Vec<ComponentInstance>)> {
    let resp: StoresResponse = serde_json::from_str(raw).context("Error parsing stores")?;

    let mut stores = vec![];
    let mut columnar = vec![];
    for wrapper in resp.stores {
        let store = wrapper.store;
        let (host, port) = parse_address(&store.address)?;
        let status_port = match &store.status_address {
            Some(addr) => Some(parse_address(addr)?.1),
            None => None,
        };

        let is_columnar = store
            .labels
            .iter()
            .any(|label| label.key == ENGINE_LABEL && label.value == ENGINE_COLUMNAR);
        // the engine label only routes the split, the rest are kept
        let labels: HashMap<String, String> = store
            .labels
            .into_iter()
            .filter(|label| label.key != ENGINE_LABEL)
            .map(|label| (label.key, label.value))
            .collect();

        let instance = ComponentInstance {
            host,
            port,
            status_port,
            deploy_path: store.deploy_path,
            labels,
            is_leader: false,
        };
        if is_columnar {
            columnar.push(instance);
        } else {
            stores.push(instance);
        }
    }
    Ok((stores, columnar))
}

#[derive(Debug, Deserialize)]
struct FrontendInfoDto {
    #[serde(default)]
    deploy_path: String,
    #[serde(default)]
    status_port: Option<u16>,
}

/// Frontends register themselves under `/topology/frontend/{addr}/info`.
/// Other keys under the prefix (ttl heartbeats) are ignored.
fn frontend_from_kv(key: &str, value: &str) -> anyhow::Result<Option<ComponentInstance>> {
    let Some(rest) = key.strip_prefix(FRONTEND_PREFIX) else {
        return Ok(None);
    };
    let Some(addr) = rest.strip_suffix("/info") else {
        return Ok(None);
    };

    let (host, port) = parse_address(addr)?;
    let info: FrontendInfoDto =
        serde_json::from_str(value).context(format!("Error parsing frontend info for {}", addr))?;
    Ok(Some(ComponentInstance {
        host,
        port,
        status_port: info.status_port,
        deploy_path: info.deploy_path,
        labels: HashMap::new(),
        is_leader: false,
    }))
}

#[derive(Debug, Deserialize)]
struct DashboardDto {
    ip: String,
    port: u16,
    #[serde(default)]
    deploy_path: String,
}

fn dashboard_from_json(raw: &str) -> anyhow::Result<ComponentInstance> {
    let dto: DashboardDto = serde_json::from_str(raw).context("Error parsing dashboard info")?;
    Ok(ComponentInstance {
        host: dto.ip,
        port: dto.port,
        status_port: None,
        deploy_path: dto.deploy_path,
        labels: HashMap::new(),
        is_leader: false,
    })
}
