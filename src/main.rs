//! Command-line interface for swarm-testbed
//!
//! # Usage Examples
//!
//! ## Run an experiment
//! ```bash
//! # 16 nodes in a ring, metrics every 5 seconds
//! swarm-testbed run --config configs/ring16.yaml
//!
//! # Same run against an in-process simulated fleet
//! swarm-testbed run --config configs/ring16.yaml --dry-run
//!
//! # Override the topology and output directory
//! swarm-testbed run --config configs/ring16.yaml \
//!   --topology random-regular --output-dir runs/random-regular
//! ```
//!
//! ## Inspect topologies
//! ```bash
//! # Planned adjacency, no network access
//! swarm-testbed plan --topology barabasi-albert --nodes 32 --matrix
//!
//! # Live peer connections of the fleet
//! swarm-testbed matrix --config configs/ring16.yaml
//! ```
//!
//! ## Compare runs
//! ```bash
//! swarm-testbed analyze runs/ring runs/full-mesh --format markdown
//! ```

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use swarm_testbed::classify;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(classify(&e).code());
    }
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, dry_run } => commands::run::run_experiment(config, dry_run).await,
        Commands::Plan { config, matrix } => commands::plan::run_plan(config, matrix),
        Commands::Matrix { config, dry_run } => {
            commands::matrix::run_matrix(config, dry_run).await
        }
        Commands::Analyze {
            runs,
            format,
            output,
        } => commands::analyze::run_analyze(runs, format, output),
    }
}
