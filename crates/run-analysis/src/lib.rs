//! Post-run analysis: transfer and resource metrics of one or more runs,
//! restricted to each run's workload window, rendered side by side.

pub mod report;
pub mod summary;

pub use report::{render, ReportFormat};
pub use summary::{summarize, PerformanceMetrics, RunSummary, TransferMetrics, Window};

use anyhow::Result;
use std::path::PathBuf;
use testbed_core::OutputConfig;

/// Summarize each run directory, labelled by its directory name.
pub fn analyze_runs(dirs: &[PathBuf], files: &OutputConfig) -> Result<Vec<RunSummary>> {
    dirs.iter()
        .map(|dir| {
            let label = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.display().to_string());
            RunSummary::load(dir, files, label)
        })
        .collect()
}
