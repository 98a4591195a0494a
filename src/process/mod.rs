//! Agent subprocesses
//!
//! Every agent runs in its own process group so the whole tree it spawns can
//! be signalled as one unit, and so signals aimed at the harness's own group
//! (Ctrl+C in a terminal) do not reach agents before the harness decides to
//! tear them down.

pub mod handle;
pub mod launcher;

pub use handle::{ProcessHandle, ProcessRole, TerminateOutcome};
pub use launcher::{
    AgentInvocation, AgentProcess, Spawner, StdioMode, StopSignal, SystemSpawner, CONTROL_NAME,
};

#[cfg(test)]
pub(crate) mod testing;
