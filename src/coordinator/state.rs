//! Run lifecycle state and the report a finished run produces

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::process::TerminateOutcome;
use crate::shutdown::ShutdownSignal;

/// Lifecycle of one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Checking prerequisites, loading the catalog, resolving names
    Resolving,
    /// Starting the control agent, then each subject
    Launching,
    /// Waiting for the timer or an interrupt
    Running,
    /// Tearing down subjects, then the control agent
    Draining,
    Terminated,
}

impl RunState {
    /// Whether `self -> next` is a legal step.
    ///
    /// Runs that fail before anything is launched jump straight to
    /// `Terminated`; `Launching -> Draining` covers aborted launches.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Resolving)
                | (Resolving, Launching)
                | (Launching, Running)
                | (Launching, Draining)
                | (Running, Draining)
                | (Draining, Terminated)
                | (Idle | Resolving | Launching, Terminated)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Resolving => write!(f, "resolving"),
            RunState::Launching => write!(f, "launching"),
            RunState::Running => write!(f, "running"),
            RunState::Draining => write!(f, "draining"),
            RunState::Terminated => write!(f, "terminated"),
        }
    }
}

/// What ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The configured duration elapsed
    Elapsed,
    /// An external signal arrived while waiting
    Interrupted(ShutdownSignal),
    /// An external signal arrived before every subject was started
    InterruptedDuringLaunch(ShutdownSignal),
}

impl std::fmt::Display for WakeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WakeReason::Elapsed => write!(f, "elapsed"),
            WakeReason::Interrupted(sig) => write!(f, "interrupted ({sig})"),
            WakeReason::InterruptedDuringLaunch(sig) => {
                write!(f, "interrupted during launch ({sig})")
            }
        }
    }
}

/// One subject as it was launched and torn down
#[derive(Debug, Clone)]
pub struct SubjectRecord {
    pub benchmark_name: String,
    pub pid: Option<u32>,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub outcome: TerminateOutcome,
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_name: String,
    pub wake: WakeReason,
    /// In launch order
    pub subjects: Vec<SubjectRecord>,
    pub control_outcome: TerminateOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn forced_kills(&self) -> usize {
        self.subjects
            .iter()
            .map(|s| s.outcome)
            .chain(std::iter::once(self.control_outcome))
            .filter(|o| *o == TerminateOutcome::Killed)
            .count()
    }
}
