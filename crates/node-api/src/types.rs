//! Payloads exchanged with nodes and with the resource-usage API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use testbed_core::PeerId;

/// Identity of a running node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub peer_id: PeerId,
    /// Dialable multiaddress, `/ip4/<ip>/tcp/<port>/p2p/<peer_id>`
    pub address: String,
}

/// Application-level counters reported by a node's status API.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeStatus {
    pub peer_count: u64,
    pub repo_size_bytes: u64,
    pub repo_num_objects: u64,
    pub bandwidth_in_bytes_per_sec: f64,
    pub bandwidth_out_bytes_per_sec: f64,
}

/// Container description from the resource-usage API (`/api/v2.0/spec`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Compose label carrying the service name.
pub const SERVICE_LABEL: &str = "com.docker.compose.service";
/// Compose label carrying the project name.
pub const PROJECT_LABEL: &str = "com.docker.compose.project";

/// Container specs keyed by container identifier.
pub type ContainerSpecs = BTreeMap<String, ContainerSpec>;

/// Stats response keyed by container identifier.
pub type ContainerStatsResponse = BTreeMap<String, Vec<ContainerStats>>;

/// One resource-usage sample of a container, with cumulative counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cpu: Option<CpuStats>,
    #[serde(default)]
    pub memory: Option<MemoryStats>,
    #[serde(default)]
    pub network: Option<NetworkStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    pub usage: CpuUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    /// Cumulative CPU time in nanoseconds
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Current memory usage in bytes
    pub usage: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    #[serde(default)]
    pub interfaces: Vec<InterfaceStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceStats {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}
