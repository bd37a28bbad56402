//! Per-run metrics over the workload window.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use run_log::{read_metrics, read_topology, read_workload, WorkloadRow};
use serde::{Deserialize, Serialize};
use std::path::Path;
use testbed_core::{
    EventOutcome, MetricSample, OperationKind, OutputConfig, TopologyEvent, TopologyEventKind,
};

/// Time span during which the workload ran.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// From the start of the first operation to the end of the last one.
    pub fn of_workload(rows: &[WorkloadRow]) -> Option<Self> {
        let start = rows.iter().map(|r| r.timestamp).min()?;
        let end = rows
            .iter()
            .map(|r| r.timestamp + chrono::Duration::milliseconds((r.duration_secs * 1000.0) as i64))
            .max()?;
        Some(Self { start, end })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferMetrics {
    pub total_uploads: usize,
    pub total_downloads: usize,
    pub upload_success_rate_percent: Option<f64>,
    pub download_success_rate_percent: Option<f64>,
    pub avg_upload_size_bytes: Option<f64>,
    pub median_upload_size_bytes: Option<f64>,
    pub avg_upload_duration_sec: Option<f64>,
    pub median_upload_duration_sec: Option<f64>,
    pub avg_download_size_bytes: Option<f64>,
    pub median_download_size_bytes: Option<f64>,
    pub avg_download_duration_sec: Option<f64>,
    pub median_download_duration_sec: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_cpu_percent: Option<f64>,
    pub max_cpu_percent: Option<f64>,
    pub avg_memory_usage_bytes: Option<f64>,
    pub max_memory_usage_bytes: Option<f64>,
    pub avg_network_rx_bytes_per_sec: Option<f64>,
    pub avg_network_tx_bytes_per_sec: Option<f64>,
}

/// Everything reported about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub label: String,
    pub window: Option<Window>,
    /// Final outcome of topology construction, if it was logged
    pub convergence: Option<EventOutcome>,
    pub transfer: TransferMetrics,
    pub performance: PerformanceMetrics,
}

impl RunSummary {
    /// Load the three logs of a run directory and summarize them.
    pub fn load(dir: &Path, files: &OutputConfig, label: impl Into<String>) -> Result<Self> {
        let output = OutputConfig {
            dir: dir.to_path_buf(),
            ..files.clone()
        };
        let metrics = read_metrics(output.metrics_path())
            .with_context(|| format!("Failed to load metrics of {dir:?}"))?;
        let workload = read_workload(output.workload_path())
            .with_context(|| format!("Failed to load workload log of {dir:?}"))?;
        let topology = read_topology(output.topology_path())
            .with_context(|| format!("Failed to load topology log of {dir:?}"))?;
        tracing::debug!(
            "{dir:?}: {} samples, {} operations, {} topology events",
            metrics.len(),
            workload.len(),
            topology.len()
        );
        Ok(summarize(label, &metrics, &workload, &topology))
    }
}

/// Summarize one run. Metrics outside the workload window are ignored; with
/// no workload every metric sample counts.
pub fn summarize(
    label: impl Into<String>,
    metrics: &[MetricSample],
    workload: &[WorkloadRow],
    topology: &[TopologyEvent],
) -> RunSummary {
    let window = Window::of_workload(workload);
    let in_window: Vec<&MetricSample> = metrics
        .iter()
        .filter(|s| window.map_or(true, |w| w.contains(s.timestamp)))
        .collect();
    let convergence = topology
        .iter()
        .rev()
        .find(|e| e.event_kind == TopologyEventKind::ApplyFinished)
        .map(|e| e.outcome);

    RunSummary {
        label: label.into(),
        window,
        convergence,
        transfer: transfer_metrics(workload),
        performance: performance_metrics(&in_window),
    }
}

fn transfer_metrics(rows: &[WorkloadRow]) -> TransferMetrics {
    let of = |kind: OperationKind| rows.iter().filter(move |r| r.action == kind);
    let succeeded = |kind: OperationKind| of(kind).filter(|r| r.success).collect::<Vec<_>>();
    let uploads = succeeded(OperationKind::Upload);
    let downloads = succeeded(OperationKind::Download);
    let total_uploads = of(OperationKind::Upload).count();
    let total_downloads = of(OperationKind::Download).count();

    let sizes = |rows: &[&WorkloadRow]| rows.iter().map(|r| r.file_size as f64).collect::<Vec<_>>();
    let durations = |rows: &[&WorkloadRow]| rows.iter().map(|r| r.duration_secs).collect::<Vec<_>>();

    TransferMetrics {
        total_uploads,
        total_downloads,
        upload_success_rate_percent: rate(uploads.len(), total_uploads),
        download_success_rate_percent: rate(downloads.len(), total_downloads),
        avg_upload_size_bytes: mean(&sizes(&uploads)),
        median_upload_size_bytes: median(sizes(&uploads)),
        avg_upload_duration_sec: mean(&durations(&uploads)),
        median_upload_duration_sec: median(durations(&uploads)),
        avg_download_size_bytes: mean(&sizes(&downloads)),
        median_download_size_bytes: median(sizes(&downloads)),
        avg_download_duration_sec: mean(&durations(&downloads)),
        median_download_duration_sec: median(durations(&downloads)),
    }
}

fn performance_metrics(samples: &[&MetricSample]) -> PerformanceMetrics {
    let values = |name: &str| {
        samples
            .iter()
            .filter(|s| s.metric_name == name)
            .map(|s| s.value)
            .collect::<Vec<_>>()
    };
    let cpu = values("cpu_percent");
    let memory = values("memory_usage_bytes");
    PerformanceMetrics {
        avg_cpu_percent: mean(&cpu),
        max_cpu_percent: max(&cpu),
        avg_memory_usage_bytes: mean(&memory),
        max_memory_usage_bytes: max(&memory),
        avg_network_rx_bytes_per_sec: mean(&values("network_rx_bytes_per_sec")),
        avg_network_tx_bytes_per_sec: mean(&values("network_tx_bytes_per_sec")),
    }
}

fn rate(part: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64 * 100.0)
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}
