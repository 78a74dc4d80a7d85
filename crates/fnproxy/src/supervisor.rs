//! Worker process supervision
//!
//! The proxy owns exactly one worker process. It is launched at boot, where a
//! launch failure is fatal, and relaunched when a health check fails.
//!
//! # State machine
//!
//! ```text
//! Stopped ──► Starting ──► Running
//!                │            │
//!                ▼            │ restart
//!              Failed ◄── Starting
//! ```
//!
//! All transitions happen under one mutex, so a boot and a restart, or two
//! restarts, never overlap. Invocation traffic never takes this lock: the
//! worker address is fixed by configuration.
//!
//! Each successful launch bumps a generation counter. Callers pass the
//! generation they observed before their failing health check; if another caller has
//! already relaunched the worker in the meantime, the restart is skipped.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not launched yet
    Stopped,
    /// Launch in progress
    Starting,
    /// Process alive after launch
    Running,
    /// Launch failed or the process died immediately
    Failed,
}

/// Fully assembled worker command line
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    /// Interpreter executable
    pub program: PathBuf,
    /// Arguments after the program
    pub args: Vec<String>,
    /// Extra environment for the worker
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    /// Assemble the runtime invocation for a worker configuration
    ///
    /// `<interpreter> [debug agent] [runtime flags] -jar <jar> serve <dir> -h <host> -p <port>`
    pub fn from_config(config: &WorkerConfig) -> Self {
        let mut args = Vec::new();

        if let Some(port) = &config.debug_port {
            args.push(format!(
                "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address={}",
                port
            ));
        }
        if let Some(options) = &config.runtime_options {
            args.extend(options.split_whitespace().map(String::from));
        }

        args.push("-jar".into());
        args.push(config.runtime_jar.display().to_string());
        args.push("serve".into());
        args.push(config.function_dir.display().to_string());
        args.push("-h".into());
        args.push(config.host.clone());
        args.push("-p".into());
        args.push(config.port.to_string());

        let env = config
            .java_home
            .iter()
            .map(|home| ("JAVA_HOME".to_string(), home.display().to_string()))
            .collect();

        Self {
            program: config.interpreter.clone(),
            args,
            env,
        }
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A launched worker process
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkerProcess: Send {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    /// Whether the process has not exited
    fn is_alive(&mut self) -> bool;

    /// Kill the process and reap it
    async fn kill(&mut self) -> io::Result<()>;
}

/// Launches worker processes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the command with inherited standard streams
    async fn launch(&self, command: &WorkerCommand) -> io::Result<Box<dyn WorkerProcess>>;
}

/// [`ProcessLauncher`] backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessLauncher;

struct ChildProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(&self, command: &WorkerCommand) -> io::Result<Box<dyn WorkerProcess>> {
        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Box::new(ChildProcess { child }))
    }
}

struct SupervisorInner {
    state: WorkerState,
    process: Option<Box<dyn WorkerProcess>>,
    generation: u64,
}

/// Owns the worker process and serializes every start and restart
pub struct WorkerSupervisor {
    command: WorkerCommand,
    launcher: Arc<dyn ProcessLauncher>,
    inner: Mutex<SupervisorInner>,
}

impl WorkerSupervisor {
    /// Create a supervisor; nothing is launched until [`start`](Self::start)
    pub fn new(command: WorkerCommand, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            command,
            launcher,
            inner: Mutex::new(SupervisorInner {
                state: WorkerState::Stopped,
                process: None,
                generation: 0,
            }),
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> WorkerState {
        self.inner.lock().await.state
    }

    /// Number of successful launches so far
    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    /// Launch the worker at boot
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.launch(&mut inner).await
    }

    /// Replace the worker observed at `seen_generation`
    ///
    /// Returns the generation now running. If the worker was already replaced
    /// since `seen_generation`, nothing is launched.
    pub async fn restart(&self, seen_generation: u64) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        if inner.generation != seen_generation && inner.state == WorkerState::Running {
            info!(
                generation = inner.generation,
                "worker already restarted, skipping"
            );
            return Ok(inner.generation);
        }

        if let Some(mut old) = inner.process.take() {
            info!(pid = ?old.id(), "stopping worker");
            if let Err(e) = old.kill().await {
                warn!(pid = ?old.id(), error = %e, "failed to stop worker");
            }
        }

        self.launch(&mut inner).await?;
        Ok(inner.generation)
    }

    async fn launch(&self, inner: &mut SupervisorInner) -> Result<()> {
        inner.state = WorkerState::Starting;
        info!(command = %self.command, "starting worker");

        let mut process = match self.launcher.launch(&self.command).await {
            Ok(process) => process,
            Err(e) => {
                inner.state = WorkerState::Failed;
                return Err(Error::Startup(format!("Unable to start function: {}", e)));
            }
        };

        if !process.is_alive() {
            inner.state = WorkerState::Failed;
            return Err(Error::Startup("Function process died".into()));
        }

        info!(pid = ?process.id(), "worker started");
        inner.process = Some(process);
        inner.state = WorkerState::Running;
        inner.generation += 1;
        Ok(())
    }
}
