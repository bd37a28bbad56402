//! Configuration types for a testbed run.
//!
//! The whole run is described by a single [`TestbedConfig`], loaded once from
//! YAML at startup. There is no runtime reconfiguration.

use crate::duration::{serde_duration, serde_opt_duration};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing YAML
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value is out of range or inconsistent with another value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Graph-generation policy for the target peer adjacency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TopologySpec {
    /// Ring lattice: every node links to `degree / 2` neighbours on each side.
    Ring {
        #[serde(default = "default_ring_degree")]
        degree: usize,
    },
    /// Every node links to the hub only.
    Star {
        #[serde(default)]
        hub: u32,
    },
    /// Every pair of nodes is linked.
    FullMesh,
    /// Uniformly random graph where every node has exactly `degree` links.
    RandomRegular {
        degree: usize,
        #[serde(default = "default_seed")]
        seed: u64,
    },
    /// Rectangular lattice. Without `columns` the node count must be a perfect square.
    Grid {
        #[serde(default)]
        columns: Option<usize>,
    },
    /// Preferential attachment: each new node attaches to `m` existing nodes.
    BarabasiAlbert {
        #[serde(default = "default_attachment")]
        m: usize,
        #[serde(default = "default_seed")]
        seed: u64,
    },
    /// Explicit edge list over node indices.
    Custom {
        #[serde(default)]
        edges: Vec<(u32, u32)>,
    },
}

fn default_ring_degree() -> usize {
    2
}

fn default_seed() -> u64 {
    42
}

fn default_attachment() -> usize {
    2
}

impl Default for TopologySpec {
    fn default() -> Self {
        TopologySpec::Ring {
            degree: default_ring_degree(),
        }
    }
}

impl TopologySpec {
    /// Short name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            TopologySpec::Ring { .. } => "ring",
            TopologySpec::Star { .. } => "star",
            TopologySpec::FullMesh => "full-mesh",
            TopologySpec::RandomRegular { .. } => "random-regular",
            TopologySpec::Grid { .. } => "grid",
            TopologySpec::BarabasiAlbert { .. } => "barabasi-albert",
            TopologySpec::Custom { .. } => "custom",
        }
    }
}

impl fmt::Display for TopologySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologySpec::Ring { degree } => write!(f, "ring(degree={degree})"),
            TopologySpec::Star { hub } => write!(f, "star(hub={hub})"),
            TopologySpec::FullMesh => write!(f, "full-mesh"),
            TopologySpec::RandomRegular { degree, seed } => {
                write!(f, "random-regular(degree={degree}, seed={seed})")
            }
            TopologySpec::Grid { columns: Some(c) } => write!(f, "grid(columns={c})"),
            TopologySpec::Grid { columns: None } => write!(f, "grid"),
            TopologySpec::BarabasiAlbert { m, seed } => {
                write!(f, "barabasi-albert(m={m}, seed={seed})")
            }
            TopologySpec::Custom { edges } => write!(f, "custom({} edges)", edges.len()),
        }
    }
}

/// How the fleet is addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Number of storage nodes in the run
    pub count: usize,
    /// Hostname prefix; node `i` is reachable as `{name_prefix}{i}`
    pub name_prefix: String,
    /// Port of the node control API
    pub control_port: u16,
    /// Port on which nodes accept peer connections
    pub swarm_port: u16,
    /// Explicit control endpoints, overriding the naming convention
    pub control_endpoints: Vec<String>,
    /// Base URL of the resource-usage API
    pub resource_api: String,
    /// Container naming prefix (defaults to `name_prefix`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_prefix: Option<String>,
    /// Compose project label the containers must carry, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Timeout of control, status and resource-usage requests
    #[serde(with = "serde_duration")]
    pub request_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            count: 16,
            name_prefix: "ipfs".to_string(),
            control_port: 5001,
            swarm_port: 4001,
            control_endpoints: Vec::new(),
            resource_api: "http://localhost:8080".to_string(),
            container_prefix: None,
            project: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl NodeConfig {
    pub fn container_prefix(&self) -> &str {
        self.container_prefix.as_deref().unwrap_or(&self.name_prefix)
    }
}

/// Bounded exponential backoff for control and metrics calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per call, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "serde_duration")]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "serde_duration")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Topology convergence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Overall deadline for one `apply`
    #[serde(with = "serde_duration")]
    pub deadline: Duration,
    /// How long to wait for a node to answer its first identity request
    #[serde(with = "serde_duration")]
    pub ready_timeout: Duration,
    /// Bound on one node's reconcile or verification step, retries included
    #[serde(with = "serde_duration")]
    pub node_timeout: Duration,
    /// Per-call retry policy
    pub retry: RetryPolicy,
    /// Extra reconcile passes when verification finds mismatches
    pub verification_retries: u32,
    /// Pause between a reconcile pass and its verification
    #[serde(with = "serde_duration")]
    pub settle_delay: Duration,
    /// Continue the run even if the topology is not exactly the planned one
    pub tolerate_incomplete: bool,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            ready_timeout: Duration::from_secs(30),
            node_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            verification_retries: 3,
            settle_delay: Duration::from_secs(1),
            tolerate_incomplete: false,
        }
    }
}

/// Metrics collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Tick period
    #[serde(with = "serde_duration")]
    pub interval: Duration,
    /// Timeout of each individual resource/status request
    #[serde(with = "serde_duration")]
    pub request_timeout: Duration,
    /// How long outstanding requests may run after stop is requested
    #[serde(with = "serde_duration")]
    pub stop_grace: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_secs(1),
        }
    }
}

/// Seeded store/retrieve workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadPlan {
    /// Random seed for deterministic scheduling and content
    pub seed: u64,
    /// Number of operations to issue
    pub operations: usize,
    /// Mean upload size in bytes (exponentially distributed)
    pub mean_size: u64,
    /// Upload size cap in bytes
    pub max_size: u64,
    /// Mean delay between consecutive operations
    #[serde(with = "serde_duration")]
    pub mean_delay: Duration,
    /// Concurrent operations allowed against one node
    pub per_node_concurrency: usize,
    /// Concurrent operations allowed across the fleet (unbounded if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    /// Timeout of a single store/retrieve request
    #[serde(with = "serde_duration")]
    pub request_timeout: Duration,
}

impl Default for WorkloadPlan {
    fn default() -> Self {
        Self {
            seed: 42,
            operations: 100,
            mean_size: 128 * 1024 * 1024,
            max_size: 512 * 1024 * 1024,
            mean_delay: Duration::from_secs(2),
            per_node_concurrency: 4,
            max_in_flight: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Where the three run logs are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub metrics_file: String,
    pub topology_file: String,
    pub workload_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./run-output"),
            metrics_file: "metrics.csv".to_string(),
            topology_file: "topology.csv".to_string(),
            workload_file: "workload.csv".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join(&self.metrics_file)
    }

    pub fn topology_path(&self) -> PathBuf {
        self.dir.join(&self.topology_file)
    }

    pub fn workload_path(&self) -> PathBuf {
        self.dir.join(&self.workload_file)
    }
}

/// Run-level lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Hard limit for the whole run
    #[serde(
        with = "serde_opt_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub deadline: Option<Duration>,
    /// Collection time after the workload finishes
    #[serde(with = "serde_duration")]
    pub cooldown: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline: None,
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Complete configuration of one testbed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestbedConfig {
    pub nodes: NodeConfig,
    pub topology: TopologySpec,
    pub convergence: ConvergenceConfig,
    pub collector: CollectorConfig,
    pub workload: WorkloadPlan,
    pub output: OutputConfig,
    pub run: RunConfig,
}

impl TestbedConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check cross-field constraints. Runs before any network activity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.count == 0 {
            return Err(ConfigError::Invalid("node count must be at least 1".into()));
        }
        if !self.nodes.control_endpoints.is_empty()
            && self.nodes.control_endpoints.len() != self.nodes.count
        {
            return Err(ConfigError::Invalid(format!(
                "{} control endpoints given for {} nodes",
                self.nodes.control_endpoints.len(),
                self.nodes.count
            )));
        }
        if self.nodes.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("node request timeout must be positive".into()));
        }
        if self.collector.interval.is_zero() {
            return Err(ConfigError::Invalid("collector interval must be positive".into()));
        }
        if self.collector.request_timeout.is_zero()
            || self.collector.request_timeout > self.collector.interval
        {
            return Err(ConfigError::Invalid(format!(
                "collector request timeout must be in (0, interval]; got {:?} with interval {:?}",
                self.collector.request_timeout, self.collector.interval
            )));
        }
        if self.convergence.node_timeout.is_zero() {
            return Err(ConfigError::Invalid("convergence node_timeout must be positive".into()));
        }
        if self.convergence.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry max_attempts must be at least 1".into()));
        }
        if self.workload.per_node_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "workload per_node_concurrency must be at least 1".into(),
            ));
        }
        if self.workload.max_in_flight == Some(0) {
            return Err(ConfigError::Invalid("workload max_in_flight must be at least 1".into()));
        }
        if self.workload.max_size == 0 {
            return Err(ConfigError::Invalid("workload max_size must be positive".into()));
        }
        Ok(())
    }
}
