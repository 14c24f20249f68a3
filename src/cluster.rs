/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod discovery;

use anyhow::Context;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

/// Suffix appended to the address of the current leader when topology is
/// shown to the user. Targets entered by the user may carry it, so every
/// lookup strips it first.
pub const LEADER_MARK: &str = "(L)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Frontend,
    PlacementAuthority,
    Storage,
    ColumnarStorage,
    Dashboard,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Frontend => "frontend",
            ComponentKind::PlacementAuthority => "placement",
            ComponentKind::Storage => "storage",
            ComponentKind::ColumnarStorage => "columnar",
            ComponentKind::Dashboard => "dashboard",
        }
    }

    pub fn try_from_str(s: &str) -> anyhow::Result<ComponentKind> {
        match s {
            "frontend" => Ok(ComponentKind::Frontend),
            "placement" => Ok(ComponentKind::PlacementAuthority),
            "storage" => Ok(ComponentKind::Storage),
            "columnar" => Ok(ComponentKind::ColumnarStorage),
            "dashboard" => Ok(ComponentKind::Dashboard),
            _ => Err(anyhow::anyhow!("Unknown component kind {}", s)),
        }
    }

    pub fn all() -> [ComponentKind; 5] {
        [
            ComponentKind::Frontend,
            ComponentKind::PlacementAuthority,
            ComponentKind::Storage,
            ComponentKind::ColumnarStorage,
            ComponentKind::Dashboard,
        ]
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One running process of the cluster. Identity is (host, port).
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentInstance {
    pub host: String,
    pub port: u16,
    pub status_port: Option<u16>,
    pub deploy_path: String,
    pub labels: HashMap<String, String>,
    pub is_leader: bool,
}

impl ComponentInstance {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address as shown to the user, with the leader mark appended when this
    /// instance currently holds the leader role.
    pub fn display_address(&self) -> String {
        if self.is_leader {
            format!("{}{}", self.address(), LEADER_MARK)
        } else {
            self.address()
        }
    }
}

/// Strips the leader mark from a user supplied address so that marked and
/// unmarked forms resolve to the same instance.
pub fn strip_leader_mark(addr: &str) -> &str {
    addr.trim().strip_suffix(LEADER_MARK).unwrap_or(addr.trim())
}

/// Splits a "host:port" address into its parts.
pub fn parse_address(addr: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .context(format!("Address {} is missing a port", addr))?;
    let port = port
        .parse::<u16>()
        .context(format!("Address {} has an invalid port", addr))?;
    Ok((host.to_string(), port))
}

/// A point-in-time view of the cluster, built once per job by discovery and
/// read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    components: HashMap<ComponentKind, Vec<ComponentInstance>>,
}

impl TopologySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ComponentKind, instances: Vec<ComponentInstance>) {
        self.components.insert(kind, instances);
    }

    pub fn instances(&self, kind: ComponentKind) -> &[ComponentInstance] {
        self.components
            .get(&kind)
            .map(|instances| instances.as_slice())
            .unwrap_or_default()
    }

    /// Finds an instance by address. The address may carry the leader mark.
    pub fn find(&self, kind: ComponentKind, addr: &str) -> Option<&ComponentInstance> {
        let addr = strip_leader_mark(addr);
        self.instances(kind)
            .iter()
            .find(|instance| instance.address() == addr)
    }

    pub fn leader(&self, kind: ComponentKind) -> Option<&ComponentInstance> {
        self.instances(kind).iter().find(|instance| instance.is_leader)
    }

    /// Distinct values of the given label across instances of a kind, in
    /// first-seen order.
    pub fn label_values(&self, kind: ComponentKind, label: &str) -> Vec<String> {
        self.instances(kind)
            .iter()
            .filter_map(|instance| instance.labels.get(label).cloned())
            .unique()
            .collect()
    }

    pub fn total_instances(&self) -> usize {
        self.components.values().map(|instances| instances.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(host: &str, port: u16, is_leader: bool) -> ComponentInstance {
        ComponentInstance {
            host: host.to_string(),
            port,
            status_port: None,
            deploy_path: "/deploy".to_string(),
            labels: HashMap::new(),
            is_leader,
        }
    }

    #[test]
    fn leader_mark_round_trips() {
        let leader = instance("10.0.0.1", 2379, true);
        let shown = leader.display_address();
        assert_eq!(shown, "10.0.0.1:2379(L)");
        assert_eq!(strip_leader_mark(&shown), "10.0.0.1:2379");

        // unmarked addresses pass through untouched
        assert_eq!(strip_leader_mark("10.0.0.1:2379"), "10.0.0.1:2379");
    }

    #[test]
    fn find_accepts_marked_and_unmarked_addresses() {
        let mut snapshot = TopologySnapshot::new();
        snapshot.insert(
            ComponentKind::PlacementAuthority,
            vec![instance("10.0.0.1", 2379, true), instance("10.0.0.2", 2379, false)],
        );

        let found = snapshot.find(ComponentKind::PlacementAuthority, "10.0.0.1:2379(L)");
        assert!(found.is_some_and(|i| i.is_leader));

        let found = snapshot.find(ComponentKind::PlacementAuthority, "10.0.0.2:2379");
        assert!(found.is_some_and(|i| !i.is_leader));

        assert!(snapshot.find(ComponentKind::Storage, "10.0.0.1:2379").is_none());
    }

    #[test]
    fn label_values_are_deduplicated_in_order() {
        let mut a = instance("10.0.0.1", 20160, false);
        a.labels.insert("zone".to_string(), "z1".to_string());
        let mut b = instance("10.0.0.2", 20160, false);
        b.labels.insert("zone".to_string(), "z2".to_string());
        let mut c = instance("10.0.0.3", 20160, false);
        c.labels.insert("zone".to_string(), "z1".to_string());

        let mut snapshot = TopologySnapshot::new();
        snapshot.insert(ComponentKind::Storage, vec![a, b, c]);

        let zones = snapshot.label_values(ComponentKind::Storage, "zone");
        assert_eq!(zones, vec!["z1".to_string(), "z2".to_string()]);
    }

    #[test]
    fn parse_address_rejects_bad_input() {
        assert!(parse_address("10.0.0.1:2379").is_ok());
        assert!(parse_address("10.0.0.1").is_err());
        assert!(parse_address("10.0.0.1:notaport").is_err());
    }
}
