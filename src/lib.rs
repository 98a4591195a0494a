pub mod allocator;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fault_server;
pub mod logging;
pub mod process;
pub mod request;
pub mod shutdown;

pub use allocator::{LaunchSpec, PortAllocator};
pub use catalog::{BenchmarkCatalog, BenchmarkDefinition};
pub use config::HarnessConfig;
pub use coordinator::{RunCoordinator, RunReport, RunState, SubjectRecord, WakeReason};
pub use error::{BenchError, Result};
pub use fault_server::{FaultServer, FaultState};
pub use process::{ProcessHandle, Spawner, SystemSpawner, TerminateOutcome};
pub use request::RunRequest;
pub use shutdown::{ShutdownListener, ShutdownSignal};
