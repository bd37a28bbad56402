//! Metric log sinks.

use crate::error::LogError;
use crate::file::{read_rows, CsvFile};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use testbed_core::{MetricSample, MetricSink, SinkError, TickBatch};

pub const METRICS_HEADER: [&str; 5] = ["node_id", "timestamp", "metric_name", "value", "source"];

/// Metric log backed by a CSV file, one row per sample.
///
/// Each tick is written with a single write and flushed, so a reader sees
/// either all of a tick or none of it.
#[derive(Debug)]
pub struct CsvMetricLog {
    file: CsvFile,
}

impl CsvMetricLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Ok(Self {
            file: CsvFile::create(path.as_ref(), &METRICS_HEADER)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl MetricSink for CsvMetricLog {
    fn append_tick(&mut self, batch: &TickBatch) -> Result<(), SinkError> {
        let rows = self.file.append(&batch.samples)?;
        tracing::trace!("Tick {}: {rows} rows to {}", batch.tick, self.path().display());
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(self.file.close()?)
    }
}

pub fn read_metrics(path: impl AsRef<Path>) -> Result<Vec<MetricSample>, LogError> {
    read_rows(path.as_ref(), &METRICS_HEADER)
}

#[derive(Debug, Default)]
struct MemoryState {
    batches: Vec<TickBatch>,
    closed: bool,
    fail_after: Option<usize>,
}

/// In-memory metric sink. Clones share the same storage, so a test can keep
/// one clone and hand the other to the collector.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetricLog {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryMetricLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that accepts `ticks` batches and fails on every later one.
    pub fn failing_after(ticks: usize) -> Self {
        let log = Self::default();
        log.lock().fail_after = Some(ticks);
        log
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn batches(&self) -> Vec<TickBatch> {
        self.lock().batches.clone()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.lock()
            .batches
            .iter()
            .flat_map(|b| b.samples.iter().cloned())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl MetricSink for MemoryMetricLog {
    fn append_tick(&mut self, batch: &TickBatch) -> Result<(), SinkError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SinkError::Closed);
        }
        if state.fail_after.is_some_and(|n| state.batches.len() >= n) {
            return Err(SinkError::Io(std::io::Error::other("disk full")));
        }
        state.batches.push(batch.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;
    use testbed_core::{MetricSource, NodeId};

    fn batch(tick: u64, ts: DateTime<Utc>) -> TickBatch {
        TickBatch {
            tick,
            timestamp: ts,
            samples: vec![
                MetricSample::new(NodeId(0), ts, "cpu_percent", 12.5, MetricSource::Resource),
                MetricSample::new(NodeId(1), ts, "peer_count", 3.0, MetricSource::Application),
            ],
        }
    }

    #[test]
    fn test_header_written_at_create() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.csv");
        CsvMetricLog::create(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "node_id,timestamp,metric_name,value,source\n");
        assert!(read_metrics(&path).unwrap().is_empty());
    }

    #[test]
    fn test_ticks_are_readable_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.csv");
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut log = CsvMetricLog::create(&path).unwrap();
        log.append_tick(&batch(0, ts)).unwrap();
        log.append_tick(&TickBatch {
            tick: 1,
            timestamp: ts,
            samples: vec![],
        })
        .unwrap();
        log.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.contains("0,2024-05-01T12:00:05Z,cpu_percent,12.5,resource"));

        let samples = read_metrics(&path).unwrap();
        assert_eq!(samples, batch(0, ts).samples);
    }

    #[test]
    fn test_closed_log_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let mut log = CsvMetricLog::create(dir.path().join("m.csv")).unwrap();
        log.close().unwrap();
        assert!(matches!(
            log.append_tick(&batch(0, Utc::now())),
            Err(SinkError::Closed)
        ));
    }

    #[test]
    fn test_create_truncates_previous_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.csv");
        let mut log = CsvMetricLog::create(&path).unwrap();
        log.append_tick(&batch(0, Utc::now())).unwrap();
        log.close().unwrap();

        CsvMetricLog::create(&path).unwrap();
        assert!(read_metrics(&path).unwrap().is_empty());
    }

    #[test]
    fn test_foreign_header_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(matches!(read_metrics(&path), Err(LogError::Header { .. })));
    }

    #[test]
    fn test_memory_log_failure_injection() {
        let shared = MemoryMetricLog::failing_after(1);
        let mut sink = shared.clone();
        sink.append_tick(&batch(0, Utc::now())).unwrap();
        assert!(sink.append_tick(&batch(1, Utc::now())).is_err());
        sink.close().unwrap();
        assert_eq!(shared.batches().len(), 1);
        assert!(shared.is_closed());
    }
}
