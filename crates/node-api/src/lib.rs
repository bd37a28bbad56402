//! Clients for the APIs a testbed run talks to.
//!
//! Each concern sits behind an `async_trait` seam so the topology builder, the
//! workload driver and the metrics collector can run against real nodes
//! ([`KuboClient`], [`CadvisorClient`]) or against the in-process [`SimFleet`].
//! A single client instance serves every node; the node is selected through
//! the [`NodeHandle`] passed to each call.

pub mod cadvisor;
pub mod error;
pub mod kubo;
pub mod retry;
pub mod sim;
pub mod types;

pub use cadvisor::CadvisorClient;
pub use error::NodeApiError;
pub use kubo::KuboClient;
pub use retry::{poll_until_ready, retry_transient};
pub use sim::SimFleet;
pub use types::{
    ContainerSpec, ContainerSpecs, ContainerStats, ContainerStatsResponse, NodeIdentity,
    NodeStatus,
};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use testbed_core::{ContainerId, NodeHandle, PeerId};

/// Peer-connection management of a node.
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn identity(&self, node: &NodeHandle) -> Result<NodeIdentity, NodeApiError>;

    /// Peers the node currently has an open connection to.
    async fn list_peers(&self, node: &NodeHandle) -> Result<Vec<PeerId>, NodeApiError>;

    async fn connect(&self, node: &NodeHandle, address: &str) -> Result<(), NodeApiError>;

    async fn disconnect(&self, node: &NodeHandle, peer: &PeerId) -> Result<(), NodeApiError>;
}

/// Content storage and retrieval on a node.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Store `data` and return its content identifier.
    async fn add(&self, node: &NodeHandle, data: Vec<u8>) -> Result<String, NodeApiError>;

    /// Retrieve `cid` and return the number of bytes received.
    async fn cat(&self, node: &NodeHandle, cid: &str) -> Result<u64, NodeApiError>;
}

/// Application-level status counters of a node.
#[async_trait]
pub trait StatusApi: Send + Sync {
    async fn status(&self, node: &NodeHandle) -> Result<NodeStatus, NodeApiError>;
}

/// Per-container resource usage, as reported by the resource-usage API.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// All containers known to the API at `endpoint`.
    async fn container_specs(&self, endpoint: &str) -> Result<ContainerSpecs, NodeApiError>;

    /// The latest samples for `container`. The response is keyed by the
    /// identifier the API attributes the samples to.
    async fn container_stats(
        &self,
        endpoint: &str,
        container: &ContainerId,
    ) -> Result<ContainerStatsResponse, NodeApiError>;
}

/// The four API seams of a run, shared between components.
#[derive(Clone)]
pub struct NodeApis {
    pub control: Arc<dyn ControlApi>,
    pub content: Arc<dyn ContentApi>,
    pub status: Arc<dyn StatusApi>,
    pub resource: Arc<dyn ResourceApi>,
}

impl NodeApis {
    /// HTTP clients for real nodes.
    ///
    /// `control_timeout` bounds control and status calls; `content_timeout`
    /// bounds add/cat transfers.
    pub fn http(
        control_timeout: Duration,
        content_timeout: Duration,
    ) -> Result<Self, NodeApiError> {
        let kubo = Arc::new(KuboClient::new(control_timeout, content_timeout)?);
        let cadvisor = Arc::new(CadvisorClient::new(control_timeout)?);
        Ok(Self {
            control: kubo.clone(),
            content: kubo.clone(),
            status: kubo,
            resource: cadvisor,
        })
    }

    /// Every seam served by the same simulated fleet.
    pub fn simulated(fleet: Arc<SimFleet>) -> Self {
        Self {
            control: fleet.clone(),
            content: fleet.clone(),
            status: fleet.clone(),
            resource: fleet,
        }
    }
}
