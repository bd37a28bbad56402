//! `matrix` command handler.

use crate::cli::ConfigArgs;
use anyhow::Context;
use run_log::TopologyLog;
use testbed_core::{OutputConfig, TopologyEvent};
use topology::ConnectionMatrix;

/// Query the live peer lists and print the connection matrix.
pub async fn run_matrix(args: ConfigArgs, dry_run: bool) -> anyhow::Result<()> {
    let config = args.load().context("Invalid configuration")?;
    let (registry, apis) = super::connect(&config, dry_run)?;
    let plan = topology::build(&config.topology, &registry)?;

    tracing::info!("Reading peer lists of {} nodes", registry.len());
    let (matrix, event) =
        ConnectionMatrix::read(apis.control.as_ref(), &registry, &config.convergence.retry).await;
    record_event(&config.output, &event)?;
    print!("{}", matrix.render());

    let unreachable = matrix.unreachable();
    if !unreachable.is_empty() {
        let ids: Vec<String> = unreachable.iter().map(ToString::to_string).collect();
        println!("Unreachable nodes: {}", ids.join(", "));
    }
    let external: usize = registry.ids().map(|id| matrix.external_peers(id)).sum();
    if external > 0 {
        println!("Peers outside the fleet: {external}");
    }
    if matrix.matches_plan(&plan) {
        println!("Matches planned topology {}", config.topology);
    } else {
        println!("Differs from planned topology {}", config.topology);
    }
    Ok(())
}

/// Append `event` to the topology log of `output`, keeping earlier rows.
fn record_event(output: &OutputConfig, event: &TopologyEvent) -> anyhow::Result<()> {
    std::fs::create_dir_all(&output.dir)
        .with_context(|| format!("Failed to create output directory {:?}", output.dir))?;
    let mut log = TopologyLog::open_append(output.topology_path())?;
    log.append(event)?;
    log.close()?;
    Ok(())
}
