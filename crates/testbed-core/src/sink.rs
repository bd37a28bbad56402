//! Storage seam for the metric log.

use crate::records::MetricSample;
use chrono::{DateTime, Utc};

/// Errors raised by a metric sink. Any of them is fatal for the collector.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode metric rows: {0}")]
    Encode(String),

    #[error("Metric log already closed")]
    Closed,
}

/// All samples gathered in one collector tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickBatch {
    /// Sequence number of the tick, starting at 0
    pub tick: u64,
    /// Timestamp shared by every sample of the tick
    pub timestamp: DateTime<Utc>,
    pub samples: Vec<MetricSample>,
}

/// Append-only destination for metric samples.
///
/// A batch is appended as a unit: readers never observe part of a tick.
/// The collector is the only writer.
pub trait MetricSink: Send + 'static {
    fn append_tick(&mut self, batch: &TickBatch) -> Result<(), SinkError>;

    /// Flush and refuse further writes.
    fn close(&mut self) -> Result<(), SinkError>;
}
