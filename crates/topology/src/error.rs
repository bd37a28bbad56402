//! Error types for plan generation and convergence.

use testbed_core::{NodeId, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Parameters that no graph satisfies
    #[error("Invalid topology spec: {0}")]
    InvalidSpec(String),

    /// An edge or hub references a node outside the registry
    #[error("Topology references node {node} but only {node_count} nodes are registered")]
    UnknownNode { node: u32, node_count: usize },

    #[error("Edge from node {0} to itself")]
    SelfLoop(NodeId),

    #[error("Plan was built for {plan} nodes but the registry has {registry}")]
    SizeMismatch { plan: usize, registry: usize },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Some nodes never answered, so their edges could not be resolved
    #[error("Topology only partially converged: {unresolved} edges unresolved, unreachable nodes {unreachable:?}")]
    PartialConvergence {
        unreachable: Vec<NodeId>,
        unresolved: usize,
    },

    /// All nodes answered but the observed graph differs from the plan
    #[error("Topology diverged from plan after {passes} passes: {summary}")]
    Diverged { passes: u32, summary: String },
}

impl TopologyError {
    /// Errors detected before any network activity.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TopologyError::InvalidSpec(_)
                | TopologyError::UnknownNode { .. }
                | TopologyError::SelfLoop(_)
                | TopologyError::SizeMismatch { .. }
                | TopologyError::Registry(_)
        )
    }
}
