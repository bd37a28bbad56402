//! Error types for node API calls.

/// Failure of a single call to a node or to the resource-usage API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeApiError {
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("cannot reach {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("unexpected payload from {endpoint}: {reason}")]
    Payload { endpoint: String, reason: String },

    /// The node understood the request and refused it.
    #[error("request rejected by {endpoint}: {reason}")]
    Rejected { endpoint: String, reason: String },
}

impl NodeApiError {
    /// Whether retrying the same call may succeed.
    ///
    /// Timeouts, connection failures, 5xx and 429 responses are transient,
    /// except a refusal to drop a link that does not exist.
    pub fn is_transient(&self) -> bool {
        match self {
            NodeApiError::Timeout { .. } | NodeApiError::Unreachable { .. } => true,
            NodeApiError::Status { status, .. } => {
                (*status >= 500 || *status == 429) && !self.is_not_connected()
            }
            NodeApiError::Payload { .. } | NodeApiError::Rejected { .. } => false,
        }
    }

    /// A disconnect that failed because the peer was no longer connected.
    pub fn is_not_connected(&self) -> bool {
        match self {
            NodeApiError::Rejected { reason: text, .. } | NodeApiError::Status { body: text, .. } => {
                text.contains("not connected")
            }
            _ => false,
        }
    }

    pub fn timeout(endpoint: impl Into<String>) -> Self {
        NodeApiError::Timeout {
            endpoint: endpoint.into(),
        }
    }

    pub fn unreachable(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        NodeApiError::Unreachable {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn payload(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        NodeApiError::Payload {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Map a transport error from the HTTP client.
    pub(crate) fn from_reqwest(endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NodeApiError::timeout(endpoint)
        } else if err.is_decode() {
            NodeApiError::payload(endpoint, err)
        } else {
            NodeApiError::unreachable(endpoint, err)
        }
    }
}
