//! `analyze` command handler.

use anyhow::Context;
use run_analysis::{analyze_runs, render, ReportFormat};
use std::path::PathBuf;
use testbed_core::OutputConfig;

/// Summarize finished runs and print or write the comparison.
pub fn run_analyze(
    runs: Vec<PathBuf>,
    format: ReportFormat,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    tracing::info!("Analyzing {} runs", runs.len());
    let summaries = analyze_runs(&runs, &OutputConfig::default())?;
    let report = render(&summaries, format)?;
    match output {
        Some(path) => {
            std::fs::write(&path, &report)
                .with_context(|| format!("Failed to write report to {path:?}"))?;
            tracing::info!("Report written to {path:?}");
        }
        None => println!("{report}"),
    }
    Ok(())
}
