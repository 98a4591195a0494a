//! Scoped ownership of one running agent

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::launcher::{AgentInvocation, AgentProcess, Spawner, StopSignal, CONTROL_NAME};
use crate::allocator::clear_storage_dir;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Control,
    Subject,
}

/// How a `terminate` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The whole group exited within the grace period after SIGTERM
    Exited,
    /// Needed SIGKILL
    Killed,
    /// Was already gone when signalled
    Gone,
    /// An earlier call already tore it down
    AlreadyTerminated,
}

impl std::fmt::Display for TerminateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminateOutcome::Exited => write!(f, "exited"),
            TerminateOutcome::Killed => write!(f, "killed"),
            TerminateOutcome::Gone => write!(f, "gone"),
            TerminateOutcome::AlreadyTerminated => write!(f, "already_terminated"),
        }
    }
}

/// Owns a running agent's process group and storage directory.
///
/// `terminate` stops the group and removes the directory exactly once; later
/// calls are no-ops. Until the group is known to be gone, dropping the handle
/// SIGKILLs it, including when a `terminate` future is cancelled mid-grace.
pub struct ProcessHandle {
    name: String,
    role: ProcessRole,
    storage_dir: PathBuf,
    pid: Option<u32>,
    process: Box<dyn AgentProcess>,
    /// `terminate` has been entered
    stopping: bool,
    /// Set once the group is gone or has been sent SIGKILL
    outcome: Option<TerminateOutcome>,
}

impl ProcessHandle {
    /// Clear the agent's storage directory and start it detached in its own process group
    pub fn launch<S>(spawner: &mut S, invocation: &AgentInvocation) -> Result<Self>
    where
        S: Spawner + ?Sized,
    {
        clear_storage_dir(&invocation.storage_dir);

        let process = spawner.spawn(invocation)?;
        let role = if invocation.name == CONTROL_NAME {
            ProcessRole::Control
        } else {
            ProcessRole::Subject
        };

        Ok(Self {
            name: invocation.name.clone(),
            role,
            storage_dir: invocation.storage_dir.clone(),
            pid: process.id(),
            process,
            stopping: false,
            outcome: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// SIGTERM the group, wait up to `grace`, then SIGKILL; remove storage afterwards.
    ///
    /// Never fails: signalling and cleanup problems are logged.
    pub async fn terminate(&mut self, grace: Duration) -> TerminateOutcome {
        if self.stopping {
            debug!(agent = %self.name, "Agent already terminated, skipping");
            return TerminateOutcome::AlreadyTerminated;
        }
        self.stopping = true;

        let outcome = match self.process.signal(StopSignal::Terminate) {
            Ok(true) => self.await_exit(grace).await,
            Ok(false) => {
                debug!(agent = %self.name, pid = ?self.pid, "Agent already exited");
                self.reap(grace).await;
                TerminateOutcome::Gone
            }
            Err(e) => {
                warn!(agent = %self.name, pid = ?self.pid, error = %e, "SIGTERM failed, escalating");
                self.kill(grace).await
            }
        };
        let outcome = self.sweep_group(outcome);
        self.finish(outcome)
    }

    /// SIGKILL the group without a grace period.
    ///
    /// Used when teardown itself is interrupted. A handle whose group is
    /// already gone keeps its earlier outcome.
    pub async fn force_kill(&mut self, reap_timeout: Duration) -> TerminateOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        self.stopping = true;
        warn!(agent = %self.name, pid = ?self.pid, "Force-killing agent group");
        let outcome = self.kill(reap_timeout).await;
        self.finish(outcome)
    }

    fn finish(&mut self, outcome: TerminateOutcome) -> TerminateOutcome {
        self.outcome = Some(outcome);
        clear_storage_dir(&self.storage_dir);
        info!(agent = %self.name, pid = ?self.pid, %outcome, "Agent stopped");
        outcome
    }

    async fn await_exit(&mut self, grace: Duration) -> TerminateOutcome {
        match tokio::time::timeout(grace, self.process.wait()).await {
            Ok(Ok(())) => TerminateOutcome::Exited,
            Ok(Err(e)) => {
                warn!(agent = %self.name, error = %e, "Failed to reap agent");
                TerminateOutcome::Exited
            }
            Err(_) => {
                warn!(
                    agent = %self.name,
                    grace_ms = grace.as_millis() as u64,
                    "Agent ignored SIGTERM, sending SIGKILL"
                );
                self.kill(grace).await
            }
        }
    }

    /// The leader is reaped; SIGKILL whatever else is left in its group
    fn sweep_group(&mut self, outcome: TerminateOutcome) -> TerminateOutcome {
        if outcome == TerminateOutcome::Killed {
            return outcome;
        }
        match self.process.group_alive() {
            Ok(false) => outcome,
            Ok(true) => {
                warn!(agent = %self.name, pid = ?self.pid, "Agent descendants outlived it, sending SIGKILL");
                match self.process.signal(StopSignal::Kill) {
                    Ok(true) => TerminateOutcome::Killed,
                    Ok(false) => outcome,
                    Err(e) => {
                        warn!(agent = %self.name, error = %e, "SIGKILL failed");
                        outcome
                    }
                }
            }
            Err(e) => {
                warn!(agent = %self.name, error = %e, "Could not check agent process group");
                outcome
            }
        }
    }

    async fn kill(&mut self, grace: Duration) -> TerminateOutcome {
        match self.process.signal(StopSignal::Kill) {
            Ok(true) => {
                self.reap(grace).await;
                TerminateOutcome::Killed
            }
            Ok(false) => {
                self.reap(grace).await;
                TerminateOutcome::Gone
            }
            Err(e) => {
                warn!(agent = %self.name, pid = ?self.pid, error = %e, "SIGKILL failed");
                TerminateOutcome::Killed
            }
        }
    }

    async fn reap(&mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.process.wait()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(agent = %self.name, error = %e, "Failed to reap agent"),
            Err(_) => warn!(agent = %self.name, "Agent still not reaped after SIGKILL"),
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("pid", &self.pid)
            .field("storage_dir", &self.storage_dir)
            .field("stopping", &self.stopping)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        if self.stopping {
            warn!(agent = %self.name, pid = ?self.pid, "Agent teardown was cancelled, killing group");
        } else {
            warn!(agent = %self.name, pid = ?self.pid, "Agent handle dropped while running, killing group");
        }
        if let Err(e) = self.process.signal(StopSignal::Kill) {
            warn!(agent = %self.name, error = %e, "SIGKILL failed");
        }
        clear_storage_dir(&self.storage_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{Event, FakeSpawner};
    use crate::process::StdioMode;
    use std::collections::{BTreeMap, HashSet};

    const GRACE: Duration = Duration::from_millis(50);

    fn invocation(name: &str, storage_dir: PathBuf) -> AgentInvocation {
        AgentInvocation {
            name: name.to_string(),
            program: PathBuf::from("./alloy"),
            args: vec![],
            env: BTreeMap::new(),
            storage_dir,
            stdio: StdioMode::Discard,
        }
    }

    #[tokio::test]
    async fn test_launch_clears_stale_storage() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("single");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stale.wal"), b"old run").unwrap();

        let mut spawner = FakeSpawner::default();
        let mut handle = ProcessHandle::launch(&mut spawner, &invocation("single", dir.clone())).unwrap();

        assert!(!dir.exists());
        assert_eq!(handle.role(), ProcessRole::Subject);
        handle.terminate(GRACE).await;
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("churn");
        let mut spawner = FakeSpawner::default();
        let mut handle = ProcessHandle::launch(&mut spawner, &invocation("churn", dir.clone())).unwrap();
        std::fs::create_dir_all(&dir).unwrap();

        assert_eq!(handle.terminate(GRACE).await, TerminateOutcome::Exited);
        assert!(!dir.exists());
        assert_eq!(handle.terminate(GRACE).await, TerminateOutcome::AlreadyTerminated);

        let signals = spawner
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Signalled(..)))
            .count();
        assert_eq!(signals, 1);
    }

    #[tokio::test]
    async fn test_stubborn_agent_is_killed_after_grace() {
        let root = tempfile::tempdir().unwrap();
        let mut spawner = FakeSpawner {
            stubborn: HashSet::from(["large".to_string()]),
            ..Default::default()
        };
        let mut handle =
            ProcessHandle::launch(&mut spawner, &invocation("large", root.path().join("large"))).unwrap();

        assert_eq!(handle.terminate(GRACE).await, TerminateOutcome::Killed);
        assert_eq!(
            spawner.events(),
            vec![
                Event::Spawned("large".into()),
                Event::Signalled("large".into(), StopSignal::Terminate),
                Event::Signalled("large".into(), StopSignal::Kill),
                Event::Reaped("large".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_crashed_agent_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        let mut spawner = FakeSpawner {
            crashed: HashSet::from(["single".to_string()]),
            ..Default::default()
        };
        let mut handle =
            ProcessHandle::launch(&mut spawner, &invocation("single", root.path().join("single"))).unwrap();

        assert_eq!(handle.terminate(GRACE).await, TerminateOutcome::Gone);
    }

    #[tokio::test]
    async fn test_descendants_outliving_leader_are_killed() {
        let root = tempfile::tempdir().unwrap();
        let mut spawner = FakeSpawner {
            lingering: HashSet::from(["churn".to_string()]),
            ..Default::default()
        };
        let mut handle =
            ProcessHandle::launch(&mut spawner, &invocation("churn", root.path().join("churn"))).unwrap();

        assert_eq!(handle.terminate(GRACE).await, TerminateOutcome::Killed);
        assert_eq!(
            spawner.events(),
            vec![
                Event::Spawned("churn".into()),
                Event::Signalled("churn".into(), StopSignal::Terminate),
                Event::Reaped("churn".into()),
                Event::Signalled("churn".into(), StopSignal::Kill),
            ]
        );

        drop(handle);
        assert_eq!(spawner.events().len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_terminate_kills_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("large");
        let mut spawner = FakeSpawner {
            stubborn: HashSet::from(["large".to_string()]),
            ..Default::default()
        };
        let mut handle = ProcessHandle::launch(&mut spawner, &invocation("large", dir.clone())).unwrap();
        std::fs::create_dir_all(&dir).unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), handle.terminate(Duration::from_secs(5))).await;
        assert!(cancelled.is_err());
        assert_eq!(handle.outcome, None);

        drop(handle);
        assert_eq!(
            spawner.events(),
            vec![
                Event::Spawned("large".into()),
                Event::Signalled("large".into(), StopSignal::Terminate),
                Event::Signalled("large".into(), StopSignal::Kill),
            ]
        );
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_force_kill_after_cancelled_terminate() {
        let root = tempfile::tempdir().unwrap();
        let mut spawner = FakeSpawner {
            stubborn: HashSet::from(["large".to_string()]),
            ..Default::default()
        };
        let mut handle =
            ProcessHandle::launch(&mut spawner, &invocation("large", root.path().join("large"))).unwrap();

        let _ = tokio::time::timeout(Duration::from_millis(10), handle.terminate(Duration::from_secs(5))).await;
        assert_eq!(handle.force_kill(GRACE).await, TerminateOutcome::Killed);
        assert_eq!(handle.force_kill(GRACE).await, TerminateOutcome::Killed);

        let kills = spawner
            .events()
            .into_iter()
            .filter(|e| *e == Event::Signalled("large".into(), StopSignal::Kill))
            .count();
        assert_eq!(kills, 1);
    }

    #[test]
    fn test_drop_kills_unterminated_group() {
        let root = tempfile::tempdir().unwrap();
        let mut spawner = FakeSpawner::default();
        let handle =
            ProcessHandle::launch(&mut spawner, &invocation(CONTROL_NAME, root.path().join("test-data"))).unwrap();
        assert_eq!(handle.role(), ProcessRole::Control);

        drop(handle);
        assert_eq!(
            spawner.events().last(),
            Some(&Event::Signalled(CONTROL_NAME.into(), StopSignal::Kill))
        );
    }
}
