//! Conversion of raw API payloads into metric samples.

use chrono::{DateTime, Utc};
use node_api::{ContainerStats, ContainerStatsResponse, NodeStatus};
use testbed_core::{ContainerMap, MetricSample, MetricSource, NodeId};

pub const CPU_PERCENT: &str = "cpu_percent";
pub const MEMORY_USAGE_BYTES: &str = "memory_usage_bytes";
pub const NETWORK_RX_BYTES_PER_SEC: &str = "network_rx_bytes_per_sec";
pub const NETWORK_TX_BYTES_PER_SEC: &str = "network_tx_bytes_per_sec";

pub const PEER_COUNT: &str = "peer_count";
pub const REPO_SIZE_BYTES: &str = "repo_size_bytes";
pub const REPO_NUM_OBJECTS: &str = "repo_num_objects";
pub const BANDWIDTH_IN_BYTES_PER_SEC: &str = "bandwidth_in_bytes_per_sec";
pub const BANDWIDTH_OUT_BYTES_PER_SEC: &str = "bandwidth_out_bytes_per_sec";

/// Resource samples of `node` from a stats response.
///
/// Entries keyed by a container that is not mapped to `node` are dropped.
pub fn resource_samples(
    node: NodeId,
    timestamp: DateTime<Utc>,
    response: &ContainerStatsResponse,
    containers: &ContainerMap,
) -> Vec<MetricSample> {
    let mut samples = Vec::new();
    for (key, stats) in response {
        match containers.node_for(key) {
            Some(owner) if owner == node => {
                samples.extend(from_stats(node, timestamp, stats));
            }
            owner => {
                tracing::warn!(
                    "Dropping stats for container {key} returned for node {node} (mapped to {})",
                    owner.map_or_else(|| "no node".to_string(), |n| format!("node {n}"))
                );
            }
        }
    }
    samples
}

/// Memory from the latest stat, rates from the latest two.
///
/// Rates are omitted when only one stat is available, when the stats are
/// not strictly ordered in time, or when a counter went backwards.
fn from_stats(node: NodeId, timestamp: DateTime<Utc>, stats: &[ContainerStats]) -> Vec<MetricSample> {
    let sample = |name: &str, value: f64| {
        MetricSample::new(node, timestamp, name, value, MetricSource::Resource)
    };
    let mut ordered: Vec<&ContainerStats> = stats.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);

    let mut samples = Vec::new();
    let Some(latest) = ordered.last() else {
        return samples;
    };
    if let Some(memory) = &latest.memory {
        samples.push(sample(MEMORY_USAGE_BYTES, memory.usage as f64));
    }

    let Some(previous) = ordered.len().checked_sub(2).map(|i| ordered[i]) else {
        return samples;
    };
    let elapsed = (latest.timestamp - previous.timestamp)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    if elapsed <= 0.0 {
        return samples;
    }

    if let (Some(cur), Some(prev)) = (&latest.cpu, &previous.cpu) {
        if let Some(delta) = cur.usage.total.checked_sub(prev.usage.total) {
            samples.push(sample(CPU_PERCENT, delta as f64 / 1e9 / elapsed * 100.0));
        }
    }

    let first_interface = |s: &ContainerStats| {
        s.network
            .as_ref()
            .and_then(|n| n.interfaces.first())
            .map(|i| (i.rx_bytes, i.tx_bytes))
    };
    if let (Some((rx, tx)), Some((prev_rx, prev_tx))) =
        (first_interface(latest), first_interface(previous))
    {
        if let Some(delta) = rx.checked_sub(prev_rx) {
            samples.push(sample(NETWORK_RX_BYTES_PER_SEC, delta as f64 / elapsed));
        }
        if let Some(delta) = tx.checked_sub(prev_tx) {
            samples.push(sample(NETWORK_TX_BYTES_PER_SEC, delta as f64 / elapsed));
        }
    }
    samples
}

/// Application samples of `node` from its status counters.
pub fn application_samples(
    node: NodeId,
    timestamp: DateTime<Utc>,
    status: &NodeStatus,
) -> Vec<MetricSample> {
    [
        (PEER_COUNT, status.peer_count as f64),
        (REPO_SIZE_BYTES, status.repo_size_bytes as f64),
        (REPO_NUM_OBJECTS, status.repo_num_objects as f64),
        (BANDWIDTH_IN_BYTES_PER_SEC, status.bandwidth_in_bytes_per_sec),
        (BANDWIDTH_OUT_BYTES_PER_SEC, status.bandwidth_out_bytes_per_sec),
    ]
    .into_iter()
    .map(|(name, value)| MetricSample::new(node, timestamp, name, value, MetricSource::Application))
    .collect()
}
