//! Error types for the run logs.

use std::path::PathBuf;
use testbed_core::SinkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} does not start with the expected header '{expected}'")]
    Header { path: PathBuf, expected: String },

    #[error("{path} is already closed")]
    Closed { path: PathBuf },
}

impl LogError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        LogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &std::path::Path, source: csv::Error) -> Self {
        LogError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<LogError> for SinkError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Io { source, .. } => SinkError::Io(source),
            LogError::Closed { .. } => SinkError::Closed,
            other => SinkError::Encode(other.to_string()),
        }
    }
}
