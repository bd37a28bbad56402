//! The fixed set of nodes participating in a run.
//!
//! The registry is built once from configuration and is read-only afterwards;
//! it is shared between components as `Arc<Registry>`.

use crate::config::NodeConfig;
use crate::ids::{ContainerId, NodeId};
use std::collections::BTreeMap;

/// Errors raised while building or querying the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry is empty")]
    Empty,

    #[error("node {0} is not registered")]
    NotFound(NodeId),

    #[error("node ids must be 0..n in order; found {found} at position {position}")]
    NonSequentialId { position: usize, found: NodeId },

    #[error("container '{container}' is mapped to both node {first} and node {second}")]
    DuplicateContainer {
        container: ContainerId,
        first: NodeId,
        second: NodeId,
    },

    #[error("node {0} has no container mapping")]
    MissingContainer(NodeId),
}

/// Addressing information of one storage node. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    pub id: NodeId,
    /// Hostname / display name, e.g. `ipfs3`
    pub name: String,
    /// Base URL of the node control API
    pub control_endpoint: String,
    /// Base URL of the resource-usage API that reports this node
    pub resource_endpoint: String,
    /// Container identifier by naming convention (`prefix + index`)
    pub container: ContainerId,
    /// Port on which the node accepts peer connections
    pub swarm_port: u16,
}

/// Injective mapping `{container identifier -> node}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerMap {
    by_container: BTreeMap<ContainerId, NodeId>,
    by_node: BTreeMap<NodeId, ContainerId>,
}

impl ContainerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping, rejecting anything that would break injectivity.
    pub fn insert(&mut self, container: ContainerId, node: NodeId) -> Result<(), RegistryError> {
        if let Some(&first) = self.by_container.get(&container) {
            return Err(RegistryError::DuplicateContainer {
                container,
                first,
                second: node,
            });
        }
        if let Some(existing) = self.by_node.get(&node) {
            return Err(RegistryError::DuplicateContainer {
                container: existing.clone(),
                first: node,
                second: node,
            });
        }
        self.by_container.insert(container.clone(), node);
        self.by_node.insert(node, container);
        Ok(())
    }

    pub fn node_for(&self, container: &str) -> Option<NodeId> {
        self.by_container
            .get(&ContainerId::new(container))
            .copied()
    }

    pub fn container_for(&self, node: NodeId) -> Option<&ContainerId> {
        self.by_node.get(&node)
    }

    /// Fail unless every registered node has a mapping.
    pub fn ensure_complete(&self, registry: &Registry) -> Result<(), RegistryError> {
        match registry
            .list()
            .iter()
            .find(|n| !self.by_node.contains_key(&n.id))
        {
            Some(node) => Err(RegistryError::MissingContainer(node.id)),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

/// Ordered, read-only collection of node handles.
#[derive(Debug, Clone)]
pub struct Registry {
    nodes: Vec<NodeHandle>,
    containers: ContainerMap,
}

impl Registry {
    /// Build the registry from the node naming convention.
    pub fn from_config(config: &NodeConfig) -> Result<Self, RegistryError> {
        let nodes = (0..config.count)
            .map(|i| {
                let name = format!("{}{}", config.name_prefix, i);
                let control_endpoint = config
                    .control_endpoints
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("http://{}:{}", name, config.control_port));
                NodeHandle {
                    id: NodeId(i as u32),
                    control_endpoint,
                    resource_endpoint: config.resource_api.trim_end_matches('/').to_string(),
                    container: ContainerId::new(format!("{}{}", config.container_prefix(), i)),
                    swarm_port: config.swarm_port,
                    name,
                }
            })
            .collect();
        Self::from_handles(nodes)
    }

    /// Build the registry from explicit handles.
    pub fn from_handles(nodes: Vec<NodeHandle>) -> Result<Self, RegistryError> {
        if nodes.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut containers = ContainerMap::new();
        for (position, node) in nodes.iter().enumerate() {
            if node.id.index() != position {
                return Err(RegistryError::NonSequentialId {
                    position,
                    found: node.id,
                });
            }
            containers.insert(node.container.clone(), node.id)?;
        }
        Ok(Self { nodes, containers })
    }

    pub fn list(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub fn resolve(&self, id: NodeId) -> Result<&NodeHandle, RegistryError> {
        self.nodes.get(id.index()).ok_or(RegistryError::NotFound(id))
    }

    /// Look a node up by its naming-convention container identifier.
    pub fn by_container(&self, container: &str) -> Option<&NodeHandle> {
        self.containers
            .node_for(container)
            .and_then(|id| self.nodes.get(id.index()))
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(count: usize) -> NodeConfig {
        NodeConfig {
            count,
            ..Default::default()
        }
    }

    #[test]
    fn test_from_config_naming_convention() {
        let registry = Registry::from_config(&config(3)).unwrap();
        assert_eq!(registry.len(), 3);
        let node = registry.resolve(NodeId(2)).unwrap();
        assert_eq!(node.name, "ipfs2");
        assert_eq!(node.control_endpoint, "http://ipfs2:5001");
        assert_eq!(node.resource_endpoint, "http://localhost:8080");
        assert_eq!(node.container.as_str(), "ipfs2");
        assert_eq!(registry.by_container("ipfs1").unwrap().id, NodeId(1));
        assert!(registry.by_container("ipfs9").is_none());
    }

    #[test]
    fn test_explicit_endpoints_override() {
        let mut cfg = config(2);
        cfg.control_endpoints = vec!["http://127.0.0.1:5001".into(), "http://127.0.0.1:5002".into()];
        cfg.container_prefix = Some("testbed-ipfs-".into());
        let registry = Registry::from_config(&cfg).unwrap();
        assert_eq!(registry.list()[1].control_endpoint, "http://127.0.0.1:5002");
        assert_eq!(registry.list()[1].container.as_str(), "testbed-ipfs-1");
    }

    #[test]
    fn test_resolve_unknown_node() {
        let registry = Registry::from_config(&config(2)).unwrap();
        assert!(matches!(
            registry.resolve(NodeId(5)),
            Err(RegistryError::NotFound(NodeId(5)))
        ));
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert!(matches!(
            Registry::from_config(&config(0)),
            Err(RegistryError::Empty)
        ));
    }

    #[test]
    fn test_container_map_is_injective() {
        let mut map = ContainerMap::new();
        map.insert(ContainerId::new("a"), NodeId(0)).unwrap();
        assert!(map.insert(ContainerId::new("a"), NodeId(1)).is_err());
        assert!(map.insert(ContainerId::new("b"), NodeId(0)).is_err());
        map.insert(ContainerId::new("b"), NodeId(1)).unwrap();
        assert_eq!(map.node_for("b"), Some(NodeId(1)));
        assert_eq!(map.container_for(NodeId(0)).unwrap().as_str(), "a");
    }

    #[test]
    fn test_container_map_completeness() {
        let registry = Registry::from_config(&config(2)).unwrap();
        let mut map = ContainerMap::new();
        map.insert(ContainerId::new("x"), NodeId(0)).unwrap();
        assert!(matches!(
            map.ensure_complete(&registry),
            Err(RegistryError::MissingContainer(NodeId(1)))
        ));
    }

    #[test]
    fn test_duplicate_container_in_handles() {
        let mut nodes = Registry::from_config(&config(2)).unwrap().list().to_vec();
        nodes[1].container = nodes[0].container.clone();
        assert!(matches!(
            Registry::from_handles(nodes),
            Err(RegistryError::DuplicateContainer { .. })
        ));
    }
}
