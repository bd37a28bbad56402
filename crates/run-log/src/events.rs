//! Topology and workload logs.

use crate::error::LogError;
use crate::file::{read_rows, CsvFile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use testbed_core::{NodeId, OperationKind, OperationOutcome, TopologyEvent};

pub const TOPOLOGY_HEADER: [&str; 5] = ["timestamp", "event_kind", "node_id", "peer_id", "outcome"];

pub const WORKLOAD_HEADER: [&str; 8] = [
    "timestamp",
    "node_id",
    "action",
    "file_size",
    "cid",
    "duration_secs",
    "success",
    "reason",
];

/// Log of every connect, disconnect and verification outcome.
#[derive(Debug)]
pub struct TopologyLog {
    file: CsvFile,
}

impl TopologyLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Ok(Self {
            file: CsvFile::create(path.as_ref(), &TOPOLOGY_HEADER)?,
        })
    }

    /// Open an existing topology log without truncating it, creating it if
    /// needed.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Ok(Self {
            file: CsvFile::open_append(path.as_ref(), &TOPOLOGY_HEADER)?,
        })
    }

    pub fn append(&mut self, event: &TopologyEvent) -> Result<(), LogError> {
        self.file.append([event]).map(|_| ())
    }

    pub fn append_all(&mut self, events: &[TopologyEvent]) -> Result<(), LogError> {
        self.file.append(events).map(|_| ())
    }

    pub fn close(&mut self) -> Result<(), LogError> {
        self.file.close()
    }
}

pub fn read_topology(path: impl AsRef<Path>) -> Result<Vec<TopologyEvent>, LogError> {
    read_rows(path.as_ref(), &TOPOLOGY_HEADER)
}

/// One row of the workload log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRow {
    pub timestamp: DateTime<Utc>,
    pub node_id: NodeId,
    pub action: OperationKind,
    pub file_size: u64,
    pub cid: Option<String>,
    pub duration_secs: f64,
    pub success: bool,
    pub reason: Option<String>,
}

impl From<&OperationOutcome> for WorkloadRow {
    fn from(outcome: &OperationOutcome) -> Self {
        Self {
            timestamp: outcome.started_at,
            node_id: outcome.node_id,
            action: outcome.kind,
            file_size: outcome.bytes,
            cid: outcome.cid.clone(),
            duration_secs: outcome.duration.as_secs_f64(),
            success: outcome.success(),
            reason: outcome.error.clone(),
        }
    }
}

impl From<WorkloadRow> for OperationOutcome {
    fn from(row: WorkloadRow) -> Self {
        let error = match (row.success, row.reason) {
            (true, _) => None,
            (false, reason) => Some(reason.unwrap_or_else(|| "unknown".to_string())),
        };
        Self {
            node_id: row.node_id,
            kind: row.action,
            started_at: row.timestamp,
            duration: Duration::try_from_secs_f64(row.duration_secs).unwrap_or_default(),
            bytes: row.file_size,
            cid: row.cid,
            error,
        }
    }
}

/// Log of every workload operation, in completion order.
#[derive(Debug)]
pub struct WorkloadLog {
    file: CsvFile,
}

impl WorkloadLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Ok(Self {
            file: CsvFile::create(path.as_ref(), &WORKLOAD_HEADER)?,
        })
    }

    pub fn append(&mut self, outcome: &OperationOutcome) -> Result<(), LogError> {
        self.file.append([WorkloadRow::from(outcome)]).map(|_| ())
    }

    pub fn close(&mut self) -> Result<(), LogError> {
        self.file.close()
    }
}

pub fn read_workload(path: impl AsRef<Path>) -> Result<Vec<WorkloadRow>, LogError> {
    read_rows(path.as_ref(), &WORKLOAD_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use testbed_core::{EventOutcome, PeerId, TopologyEventKind};

    #[test]
    fn test_topology_log_optional_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("topology.csv");
        let events = vec![
            TopologyEvent::run(TopologyEventKind::ApplyStarted, EventOutcome::Ok),
            TopologyEvent::link(
                TopologyEventKind::Connect,
                NodeId(2),
                PeerId::new("12D3KooWPeer"),
                EventOutcome::Failed,
            ),
        ];
        let mut log = TopologyLog::create(&path).unwrap();
        log.append_all(&events).unwrap();
        log.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "timestamp,event_kind,node_id,peer_id,outcome");
        assert!(lines[1].ends_with(",apply_started,,,ok"));
        assert!(lines[2].ends_with(",connect,2,12D3KooWPeer,failed"));

        assert_eq!(read_topology(&path).unwrap(), events);
    }

    #[test]
    fn test_topology_log_reopens_without_truncating() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("topology.csv");
        let started = TopologyEvent::run(TopologyEventKind::ApplyStarted, EventOutcome::Ok);
        let mut log = TopologyLog::create(&path).unwrap();
        log.append(&started).unwrap();
        log.close().unwrap();

        let read = TopologyEvent::run(TopologyEventKind::MatrixRead, EventOutcome::Ok);
        let mut log = TopologyLog::open_append(&path).unwrap();
        log.append(&read).unwrap();
        log.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("timestamp,event_kind").count(), 1);
        assert_eq!(read_topology(&path).unwrap(), vec![started, read.clone()]);

        let fresh = dir.path().join("fresh.csv");
        let mut log = TopologyLog::open_append(&fresh).unwrap();
        log.append(&read).unwrap();
        log.close().unwrap();
        assert_eq!(read_topology(&fresh).unwrap(), vec![read]);

        let other = dir.path().join("workload.csv");
        WorkloadLog::create(&other).unwrap().close().unwrap();
        assert!(matches!(
            TopologyLog::open_append(&other),
            Err(LogError::Header { .. })
        ));
    }

    #[test]
    fn test_workload_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workload.csv");
        let ok = OperationOutcome {
            node_id: NodeId(1),
            kind: OperationKind::Upload,
            started_at: Utc::now(),
            duration: Duration::from_millis(1500),
            bytes: 4096,
            cid: Some("bafkabc".into()),
            error: None,
        };
        let failed = OperationOutcome {
            kind: OperationKind::Download,
            bytes: 0,
            error: Some("timed out after 30s".into()),
            ..ok.clone()
        };
        let mut log = WorkloadLog::create(&path).unwrap();
        log.append(&ok).unwrap();
        log.append(&failed).unwrap();
        log.close().unwrap();

        let rows = read_workload(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, OperationKind::Upload);
        assert_eq!(rows[0].duration_secs, 1.5);
        assert!(rows[0].success);
        assert_eq!(rows[0].reason, None);
        assert!(!rows[1].success);
        assert_eq!(rows[1].reason.as_deref(), Some("timed out after 30s"));

        let restored: OperationOutcome = rows[1].clone().into();
        assert_eq!(restored, failed);
    }
}
