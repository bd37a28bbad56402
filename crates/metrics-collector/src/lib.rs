//! Periodic collection of per-node metrics.
//!
//! Every tick polls the resource-usage API and the status API of each node
//! concurrently, stamps all samples with the tick's timestamp and appends
//! the tick to a [`MetricSink`](testbed_core::MetricSink) as one unit.
//! Failed requests leave gaps; they never stop the collector. Only a sink
//! failure does.

pub mod collector;
pub mod discovery;
pub mod error;
pub mod normalize;

pub use collector::{CollectorHandle, CollectorSummary, MetricsCollector};
pub use discovery::discover_containers;
pub use error::CollectorError;
