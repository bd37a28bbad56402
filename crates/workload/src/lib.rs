//! Seeded store/retrieve workload.
//!
//! [`schedule`] fixes the operation sequence up front from the plan's seed;
//! [`WorkloadDriver`] issues it against the fleet and streams one
//! [`OperationOutcome`] per operation.

pub mod driver;
pub mod schedule;

pub use driver::WorkloadDriver;
pub use schedule::{content, schedule, Action, ScheduledOp};

use std::time::Duration;
use testbed_core::{OperationKind, OperationOutcome};

/// Running totals over the outcomes of one workload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadSummary {
    pub uploads: usize,
    pub downloads: usize,
    pub failures: usize,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub busy: Duration,
}

impl WorkloadSummary {
    pub fn record(&mut self, outcome: &OperationOutcome) {
        self.busy += outcome.duration;
        if !outcome.success() {
            self.failures += 1;
            return;
        }
        match outcome.kind {
            OperationKind::Upload => {
                self.uploads += 1;
                self.bytes_uploaded += outcome.bytes;
            }
            OperationKind::Download => {
                self.downloads += 1;
                self.bytes_downloaded += outcome.bytes;
            }
        }
    }

    pub fn total(&self) -> usize {
        self.uploads + self.downloads + self.failures
    }
}
