//! Building agent command lines and starting them in their own process group

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::allocator::LaunchSpec;
use crate::config::HarnessConfig;
use crate::error::{BenchError, Result};

/// Name the control agent is tracked under
pub const CONTROL_NAME: &str = "control";

/// Where an agent's stdout/stderr go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// Share the harness's streams
    Inherit,
    Discard,
}

/// Signals the harness sends to an agent's process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Kill,
}

impl std::fmt::Display for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopSignal::Terminate => write!(f, "SIGTERM"),
            StopSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// Fully resolved command line for one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Set on the child only, never on the harness itself
    pub env: BTreeMap<String, String>,
    pub storage_dir: PathBuf,
    pub stdio: StdioMode,
}

impl AgentInvocation {
    /// The discovery agent every subject talks to
    pub fn control(config: &HarnessConfig) -> Self {
        let storage_dir = config.storage.control_path();
        Self {
            name: CONTROL_NAME.to_string(),
            program: config.agent.binary.clone(),
            args: agent_args(
                config,
                &config.control.config,
                &storage_dir,
                &config.control.listen_addr(),
            ),
            env: BTreeMap::new(),
            storage_dir,
            stdio: StdioMode::Discard,
        }
    }

    /// One benchmark under test
    pub fn subject(config: &HarnessConfig, spec: &LaunchSpec) -> Self {
        Self {
            name: spec.benchmark_name.clone(),
            program: config.agent.binary.clone(),
            args: agent_args(config, &spec.config_path, &spec.storage_dir, &spec.listen_addr),
            env: spec.env_overrides.clone(),
            storage_dir: spec.storage_dir.clone(),
            stdio: StdioMode::Inherit,
        }
    }
}

fn agent_args(
    config: &HarnessConfig,
    agent_config: &std::path::Path,
    storage_dir: &std::path::Path,
    listen_addr: &str,
) -> Vec<String> {
    vec![
        config.agent.verb.clone(),
        agent_config.display().to_string(),
        format!("--storage.path={}", storage_dir.display()),
        format!("--server.http.listen-addr={listen_addr}"),
        format!("--stability.level={}", config.agent.stability_level),
    ]
}

/// A started agent, seen only through its process group
#[async_trait]
pub trait AgentProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Signal the whole process group.
    ///
    /// Returns `Ok(false)` when the group no longer exists.
    fn signal(&mut self, signal: StopSignal) -> Result<bool>;

    /// Whether any member of the process group is still running.
    ///
    /// The leader exiting does not end the group: descendants keep it alive.
    fn group_alive(&mut self) -> Result<bool>;

    /// Wait for the group leader to exit and reap it
    async fn wait(&mut self) -> Result<()>;
}

/// Starts agents. Implementations must place each child in a new process group.
#[cfg_attr(test, mockall::automock)]
pub trait Spawner: Send {
    fn spawn(&mut self, invocation: &AgentInvocation) -> Result<Box<dyn AgentProcess>>;
}

/// Spawns real OS processes through `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn spawn(&mut self, invocation: &AgentInvocation) -> Result<Box<dyn AgentProcess>> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null());

        match invocation.stdio {
            StdioMode::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            StdioMode::Discard => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| BenchError::Launch {
            name: invocation.name.clone(),
            source,
        })?;
        let pid = child.id();

        info!(
            agent = %invocation.name,
            pid = ?pid,
            program = %invocation.program.display(),
            "Agent started"
        );
        debug!(agent = %invocation.name, args = ?invocation.args, env = ?invocation.env, "Agent command line");

        Ok(Box::new(SystemProcess { child, pid }))
    }
}

/// A child started by [`SystemSpawner`]; its pid doubles as the process group id
#[derive(Debug)]
pub struct SystemProcess {
    child: Child,
    pid: Option<u32>,
}

#[async_trait]
impl AgentProcess for SystemProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    #[cfg(unix)]
    fn signal(&mut self, signal: StopSignal) -> Result<bool> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(false);
        };
        let pgid = pid as i32;
        let sig = match signal {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };

        match killpg(Pid::from_raw(pgid), sig) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(source) => Err(BenchError::Signal { pid: pgid, source }),
        }
    }

    #[cfg(unix)]
    fn group_alive(&mut self) -> Result<bool> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(false);
        };
        // A pgid is not recycled while any member remains, so this cannot hit a stranger
        match killpg(Pid::from_raw(pid as i32), None) {
            Ok(()) | Err(Errno::EPERM) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(source) => Err(BenchError::Signal {
                pid: pid as i32,
                source,
            }),
        }
    }

    #[cfg(not(unix))]
    fn group_alive(&mut self) -> Result<bool> {
        Ok(matches!(self.child.try_wait(), Ok(None)))
    }

    #[cfg(not(unix))]
    fn signal(&mut self, _signal: StopSignal) -> Result<bool> {
        // No process groups here; the direct child is all we can reach
        match self.child.start_kill() {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().await?;
        debug!(pid = ?self.pid, %status, "Agent reaped");
        Ok(())
    }
}
