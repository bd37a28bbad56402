//! Handlers of the CLI subcommands.

pub mod analyze;
pub mod matrix;
pub mod plan;
pub mod run;

use anyhow::Context;
use node_api::{NodeApis, SimFleet};
use std::sync::Arc;
use testbed_core::{Registry, TestbedConfig};

/// Registry and API clients for the configured fleet.
///
/// With `dry_run` every API is served by an in-process fleet whose nodes
/// start out linked in a ring.
pub(crate) fn connect(
    config: &TestbedConfig,
    dry_run: bool,
) -> anyhow::Result<(Arc<Registry>, NodeApis)> {
    let registry = Arc::new(Registry::from_config(&config.nodes)?);
    let apis = if dry_run {
        tracing::info!("Dry run: simulating {} nodes in-process", registry.len());
        let fleet = Arc::new(SimFleet::new(&registry));
        fleet.link_default_ring();
        NodeApis::simulated(fleet)
    } else {
        NodeApis::http(
            config.nodes.request_timeout,
            config.workload.request_timeout,
        )
        .context("Failed to build HTTP clients")?
    };
    Ok((registry, apis))
}
