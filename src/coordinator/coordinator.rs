//! Run coordinator: drives one benchmark run end to end
//!
//! `run()` walks `Idle → Resolving → Launching → Running → Draining →
//! Terminated`:
//!   - Resolving: credentials present, catalog loaded, every name known
//!   - Launching: control agent first, then each subject in request order
//!   - Running: `tokio::select!` between the duration timer and an interrupt
//!   - Draining: all subjects concurrently, then the control agent; another
//!     interrupt here drops the grace period and SIGKILLs what is left
//!
//! Once the control agent is up, every path out of `run()` (success, launch
//! failure, interrupt) goes through draining before returning.

use chrono::Utc;
use futures::future::join_all;
use futures::{FutureExt, Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::allocator::PortAllocator;
use crate::catalog::{BenchmarkCatalog, BenchmarkDefinition};
use crate::config::HarnessConfig;
use crate::error::{BenchError, Result};
use crate::process::{AgentInvocation, ProcessHandle, Spawner, TerminateOutcome};
use crate::request::RunRequest;
use crate::shutdown::ShutdownSignal;

use super::state::{RunReport, RunState, SubjectRecord, WakeReason};

/// Environment lookup used for the credential preflight
pub type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A launched subject and the port it was given
#[derive(Debug)]
struct RunningSubject {
    handle: ProcessHandle,
    port: u16,
}

/// Subjects keyed by benchmark name
type RunningSet = HashMap<String, RunningSubject>;

pub struct RunCoordinator<S: Spawner> {
    config: HarnessConfig,
    spawner: S,
    allocator: PortAllocator,
    env_lookup: EnvLookup,
    state_tx: watch::Sender<RunState>,
}

impl<S: Spawner> RunCoordinator<S> {
    pub fn new(config: HarnessConfig, spawner: S) -> Self {
        let allocator = PortAllocator::new(&config);
        let (state_tx, _) = watch::channel(RunState::Idle);
        Self {
            config,
            spawner,
            allocator,
            env_lookup: Box::new(|key| std::env::var(key).ok()),
            state_tx,
        }
    }

    /// Replace the process environment as the source of credentials
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env_lookup = Box::new(lookup);
        self
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state_tx.borrow()
    }

    fn transition(&self, next: RunState) {
        let from = self.state();
        if !from.can_transition_to(next) {
            warn!(%from, to = %next, "Unexpected run state transition");
        }
        self.state_tx.send_replace(next);
        info!(%from, to = %next, "Run state changed");
    }

    /// Fail fast on any required credential that is unset or empty
    pub fn check_prerequisites(&self) -> Result<()> {
        for key in &self.config.credentials.required {
            match (self.env_lookup)(key) {
                Some(value) if !value.is_empty() => {}
                _ => return Err(BenchError::MissingCredential(key.clone())),
            }
        }
        Ok(())
    }

    /// Everything that can reject a run before a process is started
    pub fn resolve(&self, request: &RunRequest) -> Result<Vec<BenchmarkDefinition>> {
        self.check_prerequisites()?;

        let mut seen = HashSet::new();
        for name in &request.benchmark_names {
            if !seen.insert(name.as_str()) {
                return Err(BenchError::RepeatedBenchmark(name.clone()));
            }
        }

        let catalog = BenchmarkCatalog::load(&self.config.catalog.path)?;
        let subjects = catalog.resolve(&request.benchmark_names)?;

        if self.allocator.port_for(subjects.len() - 1).is_none() {
            return Err(BenchError::InvalidConfig(format!(
                "ports.base {} leaves no room for {} subjects",
                self.config.ports.base,
                subjects.len()
            )));
        }

        Ok(subjects)
    }

    /// Execute one run.
    ///
    /// `interrupts` yields each external stop request. The first is polled
    /// between subject launches and raced against the duration timer; one
    /// arriving during teardown escalates straight to SIGKILL.
    pub async fn run<I>(&mut self, request: RunRequest, interrupts: I) -> Result<RunReport>
    where
        I: Stream<Item = ShutdownSignal>,
    {
        let started_at = Utc::now();
        self.state_tx.send_replace(RunState::Idle);

        info!(
            run = %request.run_name,
            benchmarks = ?request.benchmark_names,
            duration = %humantime::format_duration(request.duration),
            network_down = request.simulate_network_down,
            "Starting benchmark run"
        );

        self.transition(RunState::Resolving);
        let subjects = match self.resolve(&request) {
            Ok(subjects) => subjects,
            Err(e) => {
                error!(error = %e, "Run rejected before launch");
                self.transition(RunState::Terminated);
                return Err(e);
            }
        };

        self.transition(RunState::Launching);
        let control_invocation = AgentInvocation::control(&self.config);
        let mut control = match ProcessHandle::launch(&mut self.spawner, &control_invocation) {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Control agent failed to start");
                self.transition(RunState::Terminated);
                return Err(e);
            }
        };
        info!(pid = ?control.pid(), addr = %self.config.control.listen_addr(), "Control agent started");

        let interrupts = interrupts.fuse();
        tokio::pin!(interrupts);
        let mut running = RunningSet::new();
        let mut launch_order = Vec::with_capacity(subjects.len());

        let wake = match self.launch_subjects(
            &request,
            &subjects,
            &mut running,
            &mut launch_order,
            interrupts.as_mut(),
        ) {
            Ok(Some(signal)) => Ok(WakeReason::InterruptedDuringLaunch(signal)),
            Ok(None) => {
                self.transition(RunState::Running);
                Ok(Self::wait_for_wake(request.duration, interrupts.as_mut()).await)
            }
            Err(e) => {
                error!(error = %e, launched = running.len(), "Launch failed, tearing down");
                Err(e)
            }
        };

        if let Ok(reason) = &wake {
            info!(%reason, "Run finished waiting");
        }

        self.transition(RunState::Draining);
        let (mut outcomes, control_outcome) = self
            .teardown(&mut running, &mut control, interrupts.as_mut())
            .await;
        self.transition(RunState::Terminated);

        let wake = wake?;
        let subjects = launch_order
            .into_iter()
            .filter_map(|name| {
                let subject = running.remove(&name)?;
                let outcome = outcomes
                    .remove(&name)
                    .unwrap_or(TerminateOutcome::AlreadyTerminated);
                Some(SubjectRecord {
                    benchmark_name: name,
                    pid: subject.handle.pid(),
                    port: subject.port,
                    storage_dir: subject.handle.storage_dir().to_path_buf(),
                    outcome,
                })
            })
            .collect();

        let report = RunReport {
            run_name: request.run_name,
            wake,
            subjects,
            control_outcome,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            run = %report.run_name,
            subjects = report.subjects.len(),
            forced_kills = report.forced_kills(),
            elapsed_ms = report.elapsed().num_milliseconds(),
            "Benchmark run complete"
        );
        Ok(report)
    }

    /// Start each subject in order, one at a time.
    ///
    /// Returns `Ok(Some(signal))` if an interrupt arrived before every subject
    /// was started. On error, whatever was launched is already in `running`.
    fn launch_subjects<I>(
        &mut self,
        request: &RunRequest,
        subjects: &[BenchmarkDefinition],
        running: &mut RunningSet,
        launch_order: &mut Vec<String>,
        mut interrupts: Pin<&mut I>,
    ) -> Result<Option<ShutdownSignal>>
    where
        I: Stream<Item = ShutdownSignal>,
    {
        for (index, def) in subjects.iter().enumerate() {
            if let Some(Some(signal)) = interrupts.as_mut().next().now_or_never() {
                warn!(
                    %signal,
                    launched = running.len(),
                    remaining = subjects.len() - index,
                    "Interrupted while launching subjects"
                );
                return Ok(Some(signal));
            }

            let spec = self.allocator.allocate(request, def, index).ok_or_else(|| {
                BenchError::InvalidConfig(format!("no port left for benchmark {:?}", def.name))
            })?;
            let invocation = AgentInvocation::subject(&self.config, &spec);
            let handle = ProcessHandle::launch(&mut self.spawner, &invocation)?;

            info!(
                benchmark = %def.name,
                pid = ?handle.pid(),
                port = spec.port,
                storage = %spec.storage_dir.display(),
                "Subject agent started"
            );
            launch_order.push(def.name.clone());
            running.insert(
                def.name.clone(),
                RunningSubject {
                    handle,
                    port: spec.port,
                },
            );
        }
        Ok(None)
    }

    async fn wait_for_wake<I>(duration: Duration, mut interrupts: Pin<&mut I>) -> WakeReason
    where
        I: Stream<Item = ShutdownSignal>,
    {
        debug!(duration_ms = duration.as_millis() as u64, "Waiting for timer or interrupt");
        tokio::select! {
            _ = tokio::time::sleep(duration) => WakeReason::Elapsed,
            Some(signal) = interrupts.next() => WakeReason::Interrupted(signal),
        }
    }

    /// Drain every subject, then stop the control agent.
    ///
    /// An interrupt during the graceful pass abandons it and SIGKILLs every
    /// group not yet gone, subjects before the control agent.
    async fn teardown<I>(
        &self,
        running: &mut RunningSet,
        control: &mut ProcessHandle,
        mut interrupts: Pin<&mut I>,
    ) -> (HashMap<String, TerminateOutcome>, TerminateOutcome)
    where
        I: Stream<Item = ShutdownSignal>,
    {
        let grace = self.config.shutdown.grace_period;
        let graceful = async {
            let outcomes = Self::drain(running, grace).await;
            let control_outcome = control.terminate(grace).await;
            (outcomes, control_outcome)
        };

        tokio::select! {
            result = graceful => return result,
            Some(signal) = interrupts.next() => {
                warn!(%signal, "Interrupted during teardown, killing remaining agents");
            }
        }

        let results = join_all(running.iter_mut().map(|(name, subject)| async move {
            (name.clone(), subject.handle.force_kill(grace).await)
        }))
        .await;
        let control_outcome = control.force_kill(grace).await;
        (results.into_iter().collect(), control_outcome)
    }

    /// Terminate every subject; order across subjects is not defined
    async fn drain(running: &mut RunningSet, grace: Duration) -> HashMap<String, TerminateOutcome> {
        let results = join_all(running.iter_mut().map(|(name, subject)| async move {
            (name.clone(), subject.handle.terminate(grace).await)
        }))
        .await;
        debug!(drained = results.len(), "Subjects drained");
        results.into_iter().collect()
    }
}
