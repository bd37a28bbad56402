//! The three CSV logs of a run.
//!
//! Every log is created (truncated) with its header at the start of a run,
//! so a run that fails early still leaves well-formed files behind.

pub mod error;
pub mod events;
mod file;
pub mod metrics;

pub use error::LogError;
pub use events::{
    read_topology, read_workload, TopologyLog, WorkloadLog, WorkloadRow, TOPOLOGY_HEADER,
    WORKLOAD_HEADER,
};
pub use metrics::{read_metrics, CsvMetricLog, MemoryMetricLog, METRICS_HEADER};

use testbed_core::OutputConfig;

/// Writers of one run's output directory.
#[derive(Debug)]
pub struct RunLogs {
    pub metrics: CsvMetricLog,
    pub topology: TopologyLog,
    pub workload: WorkloadLog,
}

impl RunLogs {
    /// Create the output directory and the three logs in it.
    pub fn create(output: &OutputConfig) -> Result<Self, LogError> {
        std::fs::create_dir_all(&output.dir).map_err(|e| LogError::io(&output.dir, e))?;
        let logs = Self {
            metrics: CsvMetricLog::create(output.metrics_path())?,
            topology: TopologyLog::create(output.topology_path())?,
            workload: WorkloadLog::create(output.workload_path())?,
        };
        tracing::info!("Writing run logs to {}", output.dir.display());
        Ok(logs)
    }
}
