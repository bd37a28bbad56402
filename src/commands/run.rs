//! `run` command handler.

use crate::cli::ConfigArgs;
use anyhow::Context;
use swarm_testbed::{RunCoordinator, RunReport};
use testbed_core::{format_duration, TestbedConfig};
use tokio_util::sync::CancellationToken;

/// Upload size cap of a dry run; the simulated fleet does not need real payloads.
const DRY_RUN_MAX_SIZE: u64 = 1024 * 1024;

/// Run the full experiment and print its summary.
pub async fn run_experiment(args: ConfigArgs, dry_run: bool) -> anyhow::Result<()> {
    let mut config = args.load().context("Invalid configuration")?;
    if dry_run {
        shrink_payloads(&mut config);
    }
    tracing::info!(
        "Starting run: {} nodes, topology {}, output {:?}",
        config.nodes.count,
        config.topology,
        config.output.dir
    );
    let (registry, apis) = super::connect(&config, dry_run)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    let output = config.output.dir.clone();
    let report = RunCoordinator::new(config, registry, apis)
        .with_cancellation(cancel)
        .run()
        .await
        .with_context(|| format!("Run writing to {output:?} failed"))?;
    print_report(&report);
    println!("Logs written to {}", output.display());
    Ok(())
}

fn shrink_payloads(config: &mut TestbedConfig) {
    let workload = &mut config.workload;
    if workload.max_size > DRY_RUN_MAX_SIZE {
        workload.max_size = DRY_RUN_MAX_SIZE;
        workload.mean_size = workload.mean_size.min(DRY_RUN_MAX_SIZE / 4);
        tracing::info!("Dry run: upload sizes capped at {DRY_RUN_MAX_SIZE} bytes");
    }
}

fn print_report(report: &RunReport) {
    let started = report.state.started_at();
    let elapsed = (chrono::Utc::now() - started).to_std().unwrap_or_default();
    println!();
    println!("Run finished: {}", report.state.phase());
    println!("  Duration:     {}", format_duration(elapsed));
    println!(
        "  Topology:     {} ({} resolved, {} unresolved, {} unreachable nodes)",
        report.convergence.outcome,
        report.convergence.resolved_edges.len(),
        report.convergence.unresolved_edges.len(),
        report.convergence.unreachable.len()
    );
    println!(
        "  Workload:     {} uploads ({} bytes), {} downloads ({} bytes), {} failures",
        report.workload.uploads,
        report.workload.bytes_uploaded,
        report.workload.downloads,
        report.workload.bytes_downloaded,
        report.workload.failures
    );
    println!(
        "  Metrics:      {} ticks, {} samples, {} gaps, {} overruns",
        report.collector.ticks,
        report.collector.samples,
        report.collector.gaps,
        report.collector.overruns
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_caps_payloads() {
        let mut config = TestbedConfig::default();
        shrink_payloads(&mut config);
        assert_eq!(config.workload.max_size, DRY_RUN_MAX_SIZE);
        assert_eq!(config.workload.mean_size, DRY_RUN_MAX_SIZE / 4);

        config.workload.max_size = 4096;
        config.workload.mean_size = 1024;
        shrink_payloads(&mut config);
        assert_eq!(config.workload.max_size, 4096);
        assert_eq!(config.workload.mean_size, 1024);
    }
}
