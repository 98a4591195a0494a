//! In-memory agents that record what the harness did to them

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::launcher::{AgentInvocation, AgentProcess, Spawner, StopSignal};
use crate::error::{BenchError, Result};

/// One observable side effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Spawned(String),
    Signalled(String, StopSignal),
    Reaped(String),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

#[derive(Default)]
pub struct FakeSpawner {
    pub log: EventLog,
    pub invocations: Arc<Mutex<Vec<AgentInvocation>>>,
    /// Names whose spawn fails with a launch error
    pub fail: HashSet<String>,
    /// Names that ignore SIGTERM and only die on SIGKILL
    pub stubborn: HashSet<String>,
    /// Names that already exited before the harness signals them
    pub crashed: HashSet<String>,
    /// Names whose descendants ignore SIGTERM and outlive the leader
    pub lingering: HashSet<String>,
}

impl FakeSpawner {
    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&mut self, invocation: &AgentInvocation) -> Result<Box<dyn AgentProcess>> {
        if self.fail.contains(&invocation.name) {
            return Err(BenchError::Launch {
                name: invocation.name.clone(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }
        self.invocations.lock().unwrap().push(invocation.clone());
        self.log
            .lock()
            .unwrap()
            .push(Event::Spawned(invocation.name.clone()));
        Ok(Box::new(FakeProcess {
            name: invocation.name.clone(),
            log: self.log.clone(),
            stubborn: self.stubborn.contains(&invocation.name),
            alive: !self.crashed.contains(&invocation.name),
            descendants: self.lingering.contains(&invocation.name),
        }))
    }
}

pub struct FakeProcess {
    name: String,
    log: EventLog,
    stubborn: bool,
    alive: bool,
    /// Group members other than the leader still running
    descendants: bool,
}

#[async_trait]
impl AgentProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn signal(&mut self, signal: StopSignal) -> Result<bool> {
        if !self.alive && !self.descendants {
            return Ok(false);
        }
        self.log
            .lock()
            .unwrap()
            .push(Event::Signalled(self.name.clone(), signal));
        if signal == StopSignal::Kill {
            self.descendants = false;
        }
        if signal == StopSignal::Kill || !self.stubborn {
            self.alive = false;
        }
        Ok(true)
    }

    fn group_alive(&mut self) -> Result<bool> {
        Ok(self.alive || self.descendants)
    }

    async fn wait(&mut self) -> Result<()> {
        if self.alive {
            // Never exits on its own
            std::future::pending::<()>().await;
        }
        self.log.lock().unwrap().push(Event::Reaped(self.name.clone()));
        Ok(())
    }
}
