//! Row types of the three run logs.

use crate::ids::{NodeId, PeerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which API a metric sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSource {
    Resource,
    Application,
}

impl fmt::Display for MetricSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricSource::Resource => write!(f, "resource"),
            MetricSource::Application => write!(f, "application"),
        }
    }
}

/// One metric value for one node at one tick.
///
/// Uniquely identified by `(node_id, timestamp, metric_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub node_id: NodeId,
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub value: f64,
    pub source: MetricSource,
}

impl MetricSample {
    pub fn new(
        node_id: NodeId,
        timestamp: DateTime<Utc>,
        metric_name: impl Into<String>,
        value: f64,
        source: MetricSource,
    ) -> Self {
        Self {
            node_id,
            timestamp,
            metric_name: metric_name.into(),
            value,
            source,
        }
    }

    pub fn key(&self) -> (NodeId, DateTime<Utc>, &str) {
        (self.node_id, self.timestamp, self.metric_name.as_str())
    }
}

/// Kind of entry in the topology log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyEventKind {
    ApplyStarted,
    Ready,
    Unreachable,
    Disconnect,
    Connect,
    Verify,
    ApplyFinished,
    MatrixRead,
    Error,
}

impl fmt::Display for TopologyEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TopologyEventKind::ApplyStarted => "apply_started",
            TopologyEventKind::Ready => "ready",
            TopologyEventKind::Unreachable => "unreachable",
            TopologyEventKind::Disconnect => "disconnect",
            TopologyEventKind::Connect => "connect",
            TopologyEventKind::Verify => "verify",
            TopologyEventKind::ApplyFinished => "apply_finished",
            TopologyEventKind::MatrixRead => "matrix_read",
            TopologyEventKind::Error => "error",
        };
        f.write_str(s)
    }
}

/// Result column of the topology log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Ok,
    Failed,
    /// A planned link was not observed
    Missing,
    /// An observed link was not planned
    Unexpected,
    Converged,
    Partial,
    Diverged,
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventOutcome::Ok => "ok",
            EventOutcome::Failed => "failed",
            EventOutcome::Missing => "missing",
            EventOutcome::Unexpected => "unexpected",
            EventOutcome::Converged => "converged",
            EventOutcome::Partial => "partial",
            EventOutcome::Diverged => "diverged",
        };
        f.write_str(s)
    }
}

/// One entry of the topology log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyEvent {
    pub timestamp: DateTime<Utc>,
    pub event_kind: TopologyEventKind,
    pub node_id: Option<NodeId>,
    pub peer_id: Option<PeerId>,
    pub outcome: EventOutcome,
}

impl TopologyEvent {
    /// Run-level event, not tied to a node.
    pub fn run(kind: TopologyEventKind, outcome: EventOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            event_kind: kind,
            node_id: None,
            peer_id: None,
            outcome,
        }
    }

    pub fn node(kind: TopologyEventKind, node_id: NodeId, outcome: EventOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            event_kind: kind,
            node_id: Some(node_id),
            peer_id: None,
            outcome,
        }
    }

    pub fn link(
        kind: TopologyEventKind,
        node_id: NodeId,
        peer_id: PeerId,
        outcome: EventOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_kind: kind,
            node_id: Some(node_id),
            peer_id: Some(peer_id),
            outcome,
        }
    }
}

/// Content operation issued by the workload driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Upload,
    Download,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Upload => write!(f, "upload"),
            OperationKind::Download => write!(f, "download"),
        }
    }
}

/// Outcome of one workload operation. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub node_id: NodeId,
    pub kind: OperationKind,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Bytes uploaded or downloaded (requested size for failed uploads)
    pub bytes: u64,
    pub cid: Option<String>,
    /// `None` on success, the failure reason otherwise
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_key() {
        let ts = Utc::now();
        let sample = MetricSample::new(NodeId(3), ts, "cpu_percent", 12.5, MetricSource::Resource);
        assert_eq!(sample.key(), (NodeId(3), ts, "cpu_percent"));
    }

    #[test]
    fn test_display_matches_serde() {
        let json = yaml_name(&TopologyEventKind::ApplyFinished);
        assert_eq!(json, TopologyEventKind::ApplyFinished.to_string());
        assert_eq!(MetricSource::Application.to_string(), "application");
        assert_eq!(EventOutcome::Unexpected.to_string(), "unexpected");
        assert_eq!(OperationKind::Download.to_string(), "download");
    }

    fn yaml_name(kind: &TopologyEventKind) -> String {
        serde_yaml::to_string(kind).unwrap().trim().to_string()
    }
}
