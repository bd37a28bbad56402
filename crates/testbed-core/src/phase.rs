//! Run phase enumeration and the state machine owned by the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phases of a testbed run.
///
/// Transitions only move forward through
/// `Provisioning → Converging → Running → Collecting → Done`;
/// `Failed` is reachable from any phase that is not terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Registry built, waiting for nodes and the resource API.
    Provisioning,
    /// Imposing the planned topology.
    Converging,
    /// Workload in progress.
    Running,
    /// Workload finished, collector still sampling the cooldown.
    Collecting,
    Done,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &str {
        match self {
            RunPhase::Provisioning => "provisioning",
            RunPhase::Converging => "converging",
            RunPhase::Running => "running",
            RunPhase::Collecting => "collecting",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            RunPhase::Provisioning => 0,
            RunPhase::Converging => 1,
            RunPhase::Running => 2,
            RunPhase::Collecting => 3,
            RunPhase::Done => 4,
            RunPhase::Failed => 5,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected phase transition.
#[derive(Debug, thiserror::Error)]
#[error("illegal run phase transition {from} -> {to}")]
pub struct PhaseError {
    pub from: RunPhase,
    pub to: RunPhase,
}

/// Current phase plus the history of transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    phase: RunPhase,
    started_at: DateTime<Utc>,
    history: Vec<(RunPhase, DateTime<Utc>)>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            phase: RunPhase::Provisioning,
            started_at: now,
            history: vec![(RunPhase::Provisioning, now)],
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn history(&self) -> &[(RunPhase, DateTime<Utc>)] {
        &self.history
    }

    /// Move to a later phase. Skipping phases forward is allowed; going back is not.
    pub fn advance(&mut self, next: RunPhase) -> Result<(), PhaseError> {
        let legal = !self.phase.is_terminal()
            && (next == RunPhase::Failed || next.rank() > self.phase.rank());
        if !legal {
            return Err(PhaseError {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.history.push((next, Utc::now()));
        Ok(())
    }

    /// Transition to `Failed`. A no-op when the run already ended.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = RunPhase::Failed;
            self.history.push((RunPhase::Failed, Utc::now()));
        }
    }
}
