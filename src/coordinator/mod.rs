//! Run Coordinator
//!
//! Owns a benchmark run from request to teardown: resolves benchmark names,
//! launches the control agent and every subject, waits for the timer or an
//! interrupt, then tears everything down with the control agent last.

pub mod coordinator;
pub mod state;

pub use coordinator::{EnvLookup, RunCoordinator};
pub use state::{RunReport, RunState, SubjectRecord, WakeReason};
