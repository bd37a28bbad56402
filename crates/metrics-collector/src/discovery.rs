//! Maps resource-usage API container identifiers onto registry nodes.

use crate::error::CollectorError;
use node_api::types::{PROJECT_LABEL, SERVICE_LABEL};
use node_api::{ContainerSpec, ResourceApi};
use std::collections::BTreeSet;
use testbed_core::{ContainerId, ContainerMap, NodeHandle, Registry};

/// Query every distinct resource endpoint of the registry and build the
/// container map.
///
/// A container belongs to a node when its service label, or one of its
/// aliases, equals the node's naming-convention container name. With
/// `project` set, containers of other compose projects are ignored. Fails
/// unless the mapping is injective and covers every node.
pub async fn discover_containers(
    api: &dyn ResourceApi,
    registry: &Registry,
    project: Option<&str>,
) -> Result<ContainerMap, CollectorError> {
    let endpoints: BTreeSet<&str> = registry
        .list()
        .iter()
        .map(|n| n.resource_endpoint.as_str())
        .collect();

    let mut map = ContainerMap::new();
    for endpoint in endpoints {
        let specs = api
            .container_specs(endpoint)
            .await
            .map_err(|source| CollectorError::Discovery {
                endpoint: endpoint.to_string(),
                source,
            })?;
        tracing::debug!("{} containers reported by {endpoint}", specs.len());
        for (key, spec) in &specs {
            if let Some(project) = project {
                if spec.label(PROJECT_LABEL) != Some(project) {
                    continue;
                }
            }
            let Some(node) = owner(registry, spec) else {
                tracing::trace!("Ignoring container {key}");
                continue;
            };
            // Nodes are only reported by their own resource endpoint.
            if node.resource_endpoint != endpoint {
                continue;
            }
            tracing::debug!("Container {key} belongs to node {} ({})", node.id, node.name);
            map.insert(ContainerId::new(key.as_str()), node.id)?;
        }
    }
    map.ensure_complete(registry)?;
    tracing::info!("Mapped {} containers to nodes", map.len());
    Ok(map)
}

fn owner<'a>(registry: &'a Registry, spec: &ContainerSpec) -> Option<&'a NodeHandle> {
    spec.label(SERVICE_LABEL)
        .and_then(|service| registry.by_container(service))
        .or_else(|| spec.aliases.iter().find_map(|a| registry.by_container(a)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_api::SimFleet;
    use testbed_core::{NodeConfig, NodeId, RegistryError};

    fn registry(count: usize) -> Registry {
        Registry::from_config(&NodeConfig {
            count,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_discovers_every_node() {
        let registry = registry(3);
        let fleet = SimFleet::new(&registry);
        let map = discover_containers(&fleet, &registry, Some("testbed"))
            .await
            .unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.node_for("/docker/ipfs2"), Some(NodeId(2)));
        assert!(map.node_for("/docker/resource-monitor").is_none());
    }

    #[tokio::test]
    async fn test_foreign_project_leaves_nodes_unmapped() {
        let registry = registry(2);
        let fleet = SimFleet::new(&registry);
        let err = discover_containers(&fleet, &registry, Some("other"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CollectorError::Mapping(RegistryError::MissingContainer(NodeId(0)))
        ));
    }
}
