//! Process exit codes.

use crate::coordinator::RunError;
use metrics_collector::CollectorError;
use testbed_core::{ConfigError, RegistryError};
use topology::TopologyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    Unexpected = 1,
    Config = 2,
    Convergence = 3,
    Collector = 4,
    Interrupted = 5,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Map an error chain to the exit status it deserves.
///
/// The outermost recognised error decides.
pub fn classify(err: &anyhow::Error) -> ExitStatus {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<RunError>() {
            match e {
                RunError::Interrupted { .. } => return ExitStatus::Interrupted,
                RunError::Collector(c) => return classify_collector(c),
                RunError::Topology(t) => return classify_topology(t),
                RunError::Logs(_) | RunError::Phase(_) => return ExitStatus::Unexpected,
            }
        }
        if cause.is::<ConfigError>() || cause.is::<RegistryError>() {
            return ExitStatus::Config;
        }
        if let Some(e) = cause.downcast_ref::<TopologyError>() {
            return classify_topology(e);
        }
        if let Some(e) = cause.downcast_ref::<CollectorError>() {
            return classify_collector(e);
        }
    }
    ExitStatus::Unexpected
}

/// A container the resource API cannot attribute to a node is a naming
/// problem, not a collector fault.
fn classify_collector(err: &CollectorError) -> ExitStatus {
    match err {
        CollectorError::Mapping(_) => ExitStatus::Config,
        _ => ExitStatus::Collector,
    }
}

fn classify_topology(err: &TopologyError) -> ExitStatus {
    if err.is_configuration() {
        ExitStatus::Config
    } else {
        ExitStatus::Convergence
    }
}
