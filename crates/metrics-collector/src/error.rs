use node_api::NodeApiError;
use testbed_core::{RegistryError, SinkError};

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Container discovery at {endpoint} failed: {source}")]
    Discovery {
        endpoint: String,
        #[source]
        source: NodeApiError,
    },

    #[error("Container mapping is invalid: {0}")]
    Mapping(#[from] RegistryError),

    /// The metric log could not be written. Always fatal.
    #[error("Metric log write failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Collector task failed: {0}")]
    Task(String),
}
