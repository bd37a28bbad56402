//! Command-line definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use run_analysis::ReportFormat;
use std::path::PathBuf;
use std::time::Duration;
use testbed_core::{parse_duration, ConfigError, TestbedConfig, TopologySpec};

#[derive(Parser)]
#[command(name = "swarm-testbed")]
#[command(about = "Topology and workload experiments on a fleet of storage nodes")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a full experiment: converge, replay the workload, collect metrics
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Run against an in-process simulated fleet instead of real nodes
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the adjacency plan of a topology without touching the network
    Plan {
        #[command(flatten)]
        config: ConfigArgs,

        /// Also print the plan as a 0/1 matrix
        #[arg(long)]
        matrix: bool,
    },

    /// Read every node's live peer list and print the connection matrix
    Matrix {
        #[command(flatten)]
        config: ConfigArgs,

        /// Read a simulated fleet, linked as a ring, instead of real nodes
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize one or more finished runs side by side
    Analyze {
        /// Run output directories; each becomes one column
        #[arg(required = true)]
        runs: Vec<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: ReportFormat,

        /// Write the report to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Configuration file plus the overrides most often changed between runs.
#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    /// YAML configuration file; built-in defaults are used when omitted
    #[arg(long, short, env = "TESTBED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of nodes
    #[arg(long, env = "TESTBED_NODES")]
    pub nodes: Option<usize>,

    /// Topology kind, with default parameters
    #[arg(long, value_enum, env = "TESTBED_TOPOLOGY")]
    pub topology: Option<TopologyKind>,

    /// Output directory of the run logs
    #[arg(long, env = "TESTBED_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Metric polling interval (e.g. 5s, 500ms)
    #[arg(long, env = "TESTBED_INTERVAL", value_parser = parse_interval)]
    pub interval: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TopologyKind {
    Ring,
    Star,
    FullMesh,
    RandomRegular,
    Grid,
    BarabasiAlbert,
}

impl From<TopologyKind> for TopologySpec {
    fn from(kind: TopologyKind) -> Self {
        match kind {
            TopologyKind::Ring => TopologySpec::Ring { degree: 2 },
            TopologyKind::Star => TopologySpec::Star { hub: 0 },
            TopologyKind::FullMesh => TopologySpec::FullMesh,
            TopologyKind::RandomRegular => TopologySpec::RandomRegular {
                degree: 3,
                seed: 42,
            },
            TopologyKind::Grid => TopologySpec::Grid { columns: None },
            TopologyKind::BarabasiAlbert => TopologySpec::BarabasiAlbert { m: 2, seed: 42 },
        }
    }
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

impl ConfigArgs {
    /// Load the file (if any), apply the overrides and validate.
    pub fn load(&self) -> Result<TestbedConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => TestbedConfig::from_file(path)?,
            None => TestbedConfig::default(),
        };
        if let Some(nodes) = self.nodes {
            config.nodes.count = nodes;
        }
        if let Some(kind) = self.topology {
            config.topology = kind.into();
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(interval) = self.interval {
            config.collector.interval = interval;
            config.collector.request_timeout = config.collector.request_timeout.min(interval);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("swarm-testbed").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_overrides_apply_on_defaults() {
        let Commands::Run { config, dry_run } = parse(&[
            "run",
            "--dry-run",
            "--nodes",
            "9",
            "--topology",
            "grid",
            "--interval",
            "1s",
        ])
        .command
        else {
            panic!("expected run");
        };
        assert!(dry_run);
        let config = config.load().unwrap();
        assert_eq!(config.nodes.count, 9);
        assert_eq!(config.topology, TopologySpec::Grid { columns: None });
        assert_eq!(config.collector.interval, Duration::from_secs(1));
        assert_eq!(config.collector.request_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let Commands::Plan { config, .. } = parse(&["plan", "--nodes", "0"]).command else {
            panic!("expected plan");
        };
        assert!(matches!(config.load(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_analyze_requires_a_run() {
        assert!(Cli::try_parse_from(["swarm-testbed", "analyze"]).is_err());
        let Commands::Analyze { runs, format, .. } =
            parse(&["analyze", "a", "b", "--format", "latex"]).command
        else {
            panic!("expected analyze");
        };
        assert_eq!(runs.len(), 2);
        assert_eq!(format, ReportFormat::Latex);
    }
}
