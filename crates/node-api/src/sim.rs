//! In-process simulated fleet.
//!
//! [`SimFleet`] implements every API seam over shared in-memory state: peer
//! links are symmetric, stored content is addressable from any node, and the
//! resource API reports synthetic but deterministic counters derived from the
//! tokio clock. Availability of each surface can be switched per node, which
//! is how unreachable nodes, stalled requests and telemetry gaps are modelled.

use crate::error::NodeApiError;
use crate::types::{
    ContainerSpec, ContainerSpecs, ContainerStats, ContainerStatsResponse, CpuStats, CpuUsage,
    InterfaceStats, MemoryStats, NetworkStats, NodeIdentity, NodeStatus, PROJECT_LABEL,
    SERVICE_LABEL,
};
use crate::{ContentApi, ControlApi, ResourceApi, StatusApi};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use testbed_core::{ContainerId, NodeHandle, NodeId, PeerId, Registry};
use tokio::time::Instant;

const SIM_PROJECT: &str = "testbed";
const BASE_MEMORY: u64 = 64 * 1024 * 1024;

/// How a simulated surface responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Up,
    /// Connection refused immediately.
    Down,
    /// Requests never complete.
    Stalled,
}

/// API surface of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Control,
    Status,
    Resource,
}

/// A call received by the fleet, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCall {
    pub node: NodeId,
    pub op: SimOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOp {
    Identity,
    ListPeers,
    Connect(PeerId),
    Disconnect(PeerId),
    Add(u64),
    Cat(String),
    Status,
    Stats,
}

#[derive(Debug)]
struct SimNode {
    name: String,
    container: ContainerId,
    resource_key: String,
    peer_id: PeerId,
    address: String,
    control: Availability,
    status: Availability,
    resource: Availability,
    peers: BTreeSet<PeerId>,
    stored: BTreeMap<String, u64>,
    misrouted_to: Option<usize>,
    active_content: usize,
    max_active_content: usize,
}

impl SimNode {
    fn availability(&self, surface: Surface) -> Availability {
        match surface {
            Surface::Control => self.control,
            Surface::Status => self.status,
            Surface::Resource => self.resource,
        }
    }
}

#[derive(Debug)]
struct FleetState {
    nodes: Vec<SimNode>,
    blocks: BTreeMap<String, u64>,
    calls: Vec<SimCall>,
    latency: Duration,
    active_content: usize,
    max_active_content: usize,
}

impl FleetState {
    fn index_of(&self, peer: &PeerId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.peer_id == peer)
    }
}

/// Simulated fleet shared as `Arc<SimFleet>` by every component of a run.
#[derive(Debug)]
pub struct SimFleet {
    state: Mutex<FleetState>,
    origin: Instant,
    origin_wall: DateTime<Utc>,
}

impl SimFleet {
    /// One simulated node per registry entry, all surfaces up, no links.
    pub fn new(registry: &Registry) -> Self {
        let nodes = registry
            .list()
            .iter()
            .map(|handle| {
                let peer_id = PeerId::new(format!("12D3KooWSim{:04}", handle.id.0));
                let address = format!(
                    "/ip4/10.0.{}.{}/tcp/{}/p2p/{}",
                    handle.id.0 / 250,
                    handle.id.0 % 250 + 2,
                    handle.swarm_port,
                    peer_id
                );
                SimNode {
                    name: handle.name.clone(),
                    container: handle.container.clone(),
                    resource_key: format!("/docker/{}", handle.container),
                    peer_id,
                    address,
                    control: Availability::Up,
                    status: Availability::Up,
                    resource: Availability::Up,
                    peers: BTreeSet::new(),
                    stored: BTreeMap::new(),
                    misrouted_to: None,
                    active_content: 0,
                    max_active_content: 0,
                }
            })
            .collect();
        Self {
            state: Mutex::new(FleetState {
                nodes,
                blocks: BTreeMap::new(),
                calls: Vec::new(),
                latency: Duration::ZERO,
                active_content: 0,
                max_active_content: 0,
            }),
            origin: Instant::now(),
            origin_wall: Utc::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        // A panic while holding the lock only happens in a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn set_availability(&self, node: NodeId, surface: Surface, availability: Availability) {
        let mut state = self.lock();
        if let Some(n) = state.nodes.get_mut(node.index()) {
            match surface {
                Surface::Control => n.control = availability,
                Surface::Status => n.status = availability,
                Surface::Resource => n.resource = availability,
            }
        }
    }

    /// Control, status and resource surfaces all up or all down.
    pub fn set_reachable(&self, node: NodeId, reachable: bool) {
        let availability = if reachable {
            Availability::Up
        } else {
            Availability::Down
        };
        for surface in [Surface::Control, Surface::Status, Surface::Resource] {
            self.set_availability(node, surface, availability);
        }
    }

    /// Make the resource API attribute `node`'s samples to `other`'s container.
    pub fn misroute_resource(&self, node: NodeId, other: NodeId) {
        let mut state = self.lock();
        if let Some(n) = state.nodes.get_mut(node.index()) {
            n.misrouted_to = Some(other.index());
        }
    }

    /// Open a link as the nodes would on their own (bootstrap, discovery).
    pub fn link(&self, a: NodeId, b: NodeId) {
        let mut state = self.lock();
        let (Some(pa), Some(pb)) = (
            state.nodes.get(a.index()).map(|n| n.peer_id.clone()),
            state.nodes.get(b.index()).map(|n| n.peer_id.clone()),
        ) else {
            return;
        };
        if a == b {
            return;
        }
        state.nodes[a.index()].peers.insert(pb);
        state.nodes[b.index()].peers.insert(pa);
    }

    /// Link every node to its successor, like nodes that found each other
    /// through bootstrap before the topology is imposed.
    pub fn link_default_ring(&self) {
        let count = self.lock().nodes.len() as u32;
        if count < 2 {
            return;
        }
        for i in 0..count {
            self.link(NodeId(i), NodeId((i + 1) % count));
        }
    }

    /// Connect `node` to a peer outside the fleet.
    pub fn add_external_peer(&self, node: NodeId, peer: PeerId) {
        let mut state = self.lock();
        if let Some(n) = state.nodes.get_mut(node.index()) {
            n.peers.insert(peer);
        }
    }

    pub fn peer_id(&self, node: NodeId) -> Option<PeerId> {
        self.lock()
            .nodes
            .get(node.index())
            .map(|n| n.peer_id.clone())
    }

    pub fn peers_of(&self, node: NodeId) -> BTreeSet<PeerId> {
        self.lock()
            .nodes
            .get(node.index())
            .map(|n| n.peers.clone())
            .unwrap_or_default()
    }

    /// Whether `a` and `b` are linked, as seen from both sides.
    pub fn is_linked(&self, a: NodeId, b: NodeId) -> bool {
        let state = self.lock();
        match (state.nodes.get(a.index()), state.nodes.get(b.index())) {
            (Some(na), Some(nb)) => na.peers.contains(&nb.peer_id) && nb.peers.contains(&na.peer_id),
            _ => false,
        }
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Highest number of simultaneous add/cat calls seen on `node`.
    pub fn max_concurrent_content(&self, node: NodeId) -> usize {
        self.lock()
            .nodes
            .get(node.index())
            .map(|n| n.max_active_content)
            .unwrap_or(0)
    }

    /// Highest number of simultaneous add/cat calls seen fleet-wide.
    pub fn max_concurrent_content_total(&self) -> usize {
        self.lock().max_active_content
    }

    pub fn stored_objects(&self, node: NodeId) -> usize {
        self.lock()
            .nodes
            .get(node.index())
            .map(|n| n.stored.len())
            .unwrap_or(0)
    }

    /// Record the call and apply availability and latency of `surface`.
    async fn enter(
        &self,
        node: &NodeHandle,
        surface: Surface,
        op: SimOp,
    ) -> Result<(), NodeApiError> {
        let (availability, latency) = {
            let mut state = self.lock();
            let Some(n) = state.nodes.get(node.id.index()) else {
                return Err(NodeApiError::unreachable(&node.control_endpoint, "unknown host"));
            };
            let availability = n.availability(surface);
            state.calls.push(SimCall { node: node.id, op });
            (availability, state.latency)
        };
        match availability {
            Availability::Down => Err(NodeApiError::unreachable(
                &node.control_endpoint,
                "connection refused",
            )),
            Availability::Stalled => std::future::pending().await,
            Availability::Up => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                Ok(())
            }
        }
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        self.origin_wall + chrono::Duration::from_std(elapsed).unwrap_or_default()
    }

    fn synthetic_stats(&self, index: usize, stored_bytes: u64) -> Vec<ContainerStats> {
        let now = self.wall_clock();
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        // CPU share in per-mille of one core, network rate in bytes per ms.
        let cpu_permille = 100 + 50 * (index % 10) as u64;
        let rx_per_ms = (index + 1) as u64;
        [Duration::from_secs(1), Duration::ZERO]
            .into_iter()
            .map(|back| {
                let ms = elapsed.saturating_sub(back).as_millis() as u64;
                ContainerStats {
                    timestamp: now - chrono::Duration::from_std(back).unwrap_or_default(),
                    cpu: Some(CpuStats {
                        usage: CpuUsage {
                            total: ms * cpu_permille * 1000,
                        },
                    }),
                    memory: Some(MemoryStats {
                        usage: BASE_MEMORY + stored_bytes,
                    }),
                    network: Some(NetworkStats {
                        interfaces: vec![InterfaceStats {
                            name: "eth0".into(),
                            rx_bytes: ms * rx_per_ms,
                            tx_bytes: ms * rx_per_ms / 2,
                        }],
                    }),
                }
            })
            .collect()
    }
}

/// Marks an add/cat call in flight for concurrency accounting.
struct ContentGuard<'a> {
    fleet: &'a SimFleet,
    node: usize,
}

impl<'a> ContentGuard<'a> {
    fn new(fleet: &'a SimFleet, node: usize) -> Self {
        let mut state = fleet.lock();
        state.active_content += 1;
        state.max_active_content = state.max_active_content.max(state.active_content);
        if let Some(n) = state.nodes.get_mut(node) {
            n.active_content += 1;
            n.max_active_content = n.max_active_content.max(n.active_content);
        }
        Self { fleet, node }
    }
}

impl Drop for ContentGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.fleet.lock();
        state.active_content = state.active_content.saturating_sub(1);
        if let Some(n) = state.nodes.get_mut(self.node) {
            n.active_content = n.active_content.saturating_sub(1);
        }
    }
}

/// FNV-1a, enough to give equal content equal identifiers.
fn content_hash(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl ControlApi for SimFleet {
    async fn identity(&self, node: &NodeHandle) -> Result<NodeIdentity, NodeApiError> {
        self.enter(node, Surface::Control, SimOp::Identity).await?;
        let state = self.lock();
        let n = &state.nodes[node.id.index()];
        Ok(NodeIdentity {
            peer_id: n.peer_id.clone(),
            address: n.address.clone(),
        })
    }

    async fn list_peers(&self, node: &NodeHandle) -> Result<Vec<PeerId>, NodeApiError> {
        self.enter(node, Surface::Control, SimOp::ListPeers).await?;
        let state = self.lock();
        Ok(state.nodes[node.id.index()].peers.iter().cloned().collect())
    }

    async fn connect(&self, node: &NodeHandle, address: &str) -> Result<(), NodeApiError> {
        let target_peer = PeerId::new(address.rsplit("/p2p/").next().unwrap_or_default());
        self.enter(node, Surface::Control, SimOp::Connect(target_peer.clone()))
            .await?;
        let mut state = self.lock();
        let Some(target) = state.index_of(&target_peer) else {
            return Err(NodeApiError::Rejected {
                endpoint: node.control_endpoint.clone(),
                reason: format!("no route to {address}"),
            });
        };
        if state.nodes[target].control != Availability::Up {
            return Err(NodeApiError::Status {
                endpoint: node.control_endpoint.clone(),
                status: 500,
                body: format!("failed to dial {target_peer}"),
            });
        }
        let own = state.nodes[node.id.index()].peer_id.clone();
        if own == target_peer {
            return Err(NodeApiError::Rejected {
                endpoint: node.control_endpoint.clone(),
                reason: "dial to self attempted".into(),
            });
        }
        state.nodes[node.id.index()].peers.insert(target_peer);
        state.nodes[target].peers.insert(own);
        Ok(())
    }

    async fn disconnect(&self, node: &NodeHandle, peer: &PeerId) -> Result<(), NodeApiError> {
        self.enter(node, Surface::Control, SimOp::Disconnect(peer.clone()))
            .await?;
        let mut state = self.lock();
        if !state.nodes[node.id.index()].peers.remove(peer) {
            return Err(NodeApiError::Rejected {
                endpoint: node.control_endpoint.clone(),
                reason: format!("not connected to {peer}"),
            });
        }
        if let Some(other) = state.index_of(peer) {
            let own = state.nodes[node.id.index()].peer_id.clone();
            state.nodes[other].peers.remove(&own);
        }
        Ok(())
    }
}

#[async_trait]
impl ContentApi for SimFleet {
    async fn add(&self, node: &NodeHandle, data: Vec<u8>) -> Result<String, NodeApiError> {
        let _guard = ContentGuard::new(self, node.id.index());
        self.enter(node, Surface::Control, SimOp::Add(data.len() as u64))
            .await?;
        let cid = format!("bafksim{:016x}{:08x}", content_hash(&data), data.len());
        let mut state = self.lock();
        state.nodes[node.id.index()]
            .stored
            .insert(cid.clone(), data.len() as u64);
        state.blocks.insert(cid.clone(), data.len() as u64);
        Ok(cid)
    }

    async fn cat(&self, node: &NodeHandle, cid: &str) -> Result<u64, NodeApiError> {
        let _guard = ContentGuard::new(self, node.id.index());
        self.enter(node, Surface::Control, SimOp::Cat(cid.to_string()))
            .await?;
        let state = self.lock();
        state.blocks.get(cid).copied().ok_or_else(|| NodeApiError::Rejected {
            endpoint: node.control_endpoint.clone(),
            reason: format!("block {cid} not found"),
        })
    }
}

#[async_trait]
impl StatusApi for SimFleet {
    async fn status(&self, node: &NodeHandle) -> Result<NodeStatus, NodeApiError> {
        self.enter(node, Surface::Status, SimOp::Status).await?;
        let state = self.lock();
        let n = &state.nodes[node.id.index()];
        let rate = 1000.0 * (node.id.0 + 1) as f64;
        Ok(NodeStatus {
            peer_count: n.peers.len() as u64,
            repo_size_bytes: n.stored.values().sum(),
            repo_num_objects: n.stored.len() as u64,
            bandwidth_in_bytes_per_sec: rate,
            bandwidth_out_bytes_per_sec: rate / 2.0,
        })
    }
}

#[async_trait]
impl ResourceApi for SimFleet {
    async fn container_specs(&self, _endpoint: &str) -> Result<ContainerSpecs, NodeApiError> {
        let state = self.lock();
        let mut specs: ContainerSpecs = state
            .nodes
            .iter()
            .map(|n| {
                let spec = ContainerSpec {
                    aliases: vec![format!("{SIM_PROJECT}-{}-1", n.name), n.container.to_string()],
                    labels: BTreeMap::from([
                        (SERVICE_LABEL.to_string(), n.container.to_string()),
                        (PROJECT_LABEL.to_string(), SIM_PROJECT.to_string()),
                    ]),
                };
                (n.resource_key.clone(), spec)
            })
            .collect();
        specs.insert(
            "/docker/resource-monitor".into(),
            ContainerSpec {
                aliases: vec!["cadvisor".into()],
                labels: BTreeMap::from([(SERVICE_LABEL.to_string(), "cadvisor".to_string())]),
            },
        );
        Ok(specs)
    }

    async fn container_stats(
        &self,
        endpoint: &str,
        container: &ContainerId,
    ) -> Result<ContainerStatsResponse, NodeApiError> {
        let (index, availability, latency) = {
            let mut state = self.lock();
            let Some(index) = state
                .nodes
                .iter()
                .position(|n| n.resource_key == container.as_str())
            else {
                return Err(NodeApiError::Status {
                    endpoint: endpoint.to_string(),
                    status: 404,
                    body: format!("unknown container {container}"),
                });
            };
            state.calls.push(SimCall {
                node: NodeId(index as u32),
                op: SimOp::Stats,
            });
            (index, state.nodes[index].resource, state.latency)
        };
        match availability {
            Availability::Down => {
                return Err(NodeApiError::unreachable(endpoint, "connection refused"))
            }
            Availability::Stalled => std::future::pending::<()>().await,
            Availability::Up => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
            }
        }
        let (key, stored) = {
            let state = self.lock();
            let n = &state.nodes[index];
            let reported = n.misrouted_to.unwrap_or(index);
            (
                state.nodes[reported].resource_key.clone(),
                n.stored.values().sum::<u64>(),
            )
        };
        Ok(BTreeMap::from([(key, self.synthetic_stats(index, stored))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testbed_core::NodeConfig;

    fn fleet(count: usize) -> (Registry, SimFleet) {
        let registry = Registry::from_config(&NodeConfig {
            count,
            ..Default::default()
        })
        .unwrap();
        let fleet = SimFleet::new(&registry);
        (registry, fleet)
    }

    #[tokio::test]
    async fn test_connect_is_symmetric() {
        let (registry, fleet) = fleet(3);
        let target = fleet.identity(&registry.list()[1]).await.unwrap();
        fleet.connect(&registry.list()[0], &target.address).await.unwrap();
        assert!(fleet.is_linked(NodeId(0), NodeId(1)));
        assert_eq!(
            fleet.list_peers(&registry.list()[1]).await.unwrap(),
            vec![fleet.peer_id(NodeId(0)).unwrap()]
        );

        fleet
            .disconnect(&registry.list()[1], &target_peer(&fleet, 0))
            .await
            .unwrap();
        assert!(!fleet.is_linked(NodeId(0), NodeId(1)));
        assert!(fleet.peers_of(NodeId(0)).is_empty());
    }

    fn target_peer(fleet: &SimFleet, i: u32) -> PeerId {
        fleet.peer_id(NodeId(i)).unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_node_refuses_calls() {
        let (registry, fleet) = fleet(2);
        fleet.set_reachable(NodeId(1), false);
        let err = fleet.list_peers(&registry.list()[1]).await.unwrap_err();
        assert!(err.is_transient());

        let target = format!("/ip4/10.0.0.3/tcp/4001/p2p/{}", target_peer(&fleet, 1));
        let err = fleet.connect(&registry.list()[0], &target).await.unwrap_err();
        assert!(matches!(err, NodeApiError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_content_round_trip_across_nodes() {
        let (registry, fleet) = fleet(2);
        let cid = fleet.add(&registry.list()[0], vec![7u8; 4096]).await.unwrap();
        assert_eq!(fleet.cat(&registry.list()[1], &cid).await.unwrap(), 4096);
        assert_eq!(fleet.stored_objects(NodeId(0)), 1);
        assert!(fleet.cat(&registry.list()[1], "bafkmissing").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_stats_report_steady_rates() {
        let (registry, fleet) = fleet(2);
        tokio::time::advance(Duration::from_secs(10)).await;
        let container = ContainerId::new("/docker/ipfs1");
        let response = fleet
            .container_stats(&registry.list()[1].resource_endpoint, &container)
            .await
            .unwrap();
        let stats = &response["/docker/ipfs1"];
        assert_eq!(stats.len(), 2);
        let dt = (stats[1].timestamp - stats[0].timestamp).num_milliseconds();
        assert_eq!(dt, 1000);
        let cpu_delta =
            stats[1].cpu.as_ref().unwrap().usage.total - stats[0].cpu.as_ref().unwrap().usage.total;
        assert_eq!(cpu_delta, 150_000_000);
    }

    #[tokio::test]
    async fn test_misrouted_stats_carry_other_key() {
        let (registry, fleet) = fleet(2);
        fleet.misroute_resource(NodeId(0), NodeId(1));
        let response = fleet
            .container_stats(
                &registry.list()[0].resource_endpoint,
                &ContainerId::new("/docker/ipfs0"),
            )
            .await
            .unwrap();
        assert!(response.contains_key("/docker/ipfs1"));
    }

    #[tokio::test]
    async fn test_specs_include_foreign_container() {
        let (registry, fleet) = fleet(2);
        let specs = fleet
            .container_specs(&registry.list()[0].resource_endpoint)
            .await
            .unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs["/docker/ipfs0"].label(SERVICE_LABEL), Some("ipfs0"));
    }
}
