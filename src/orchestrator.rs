//! Launch, supervise and reap one isolated execution.
//!
//! ```text
//! PREPARING ──► RUNNING ──► COMPLETED
//!     │            ├──────► TIMED_OUT
//!     └────────────┴──────► LAUNCH_FAILED
//! ```
//!
//! PREPARING materializes the [`ExecutionUnit`] and builds the invocation.
//! RUNNING spawns the process in its own process group and drains stdout
//! and stderr on two tasks while the wait runs against the wall deadline.
//! Whatever the outcome, the whole process group is killed, the child is
//! reaped and the unit directory is removed.
//!
//! A runner that cannot confine itself says so on a dedicated status pipe
//! (see `status.rs`), never on the guest's own streams, so guest output cannot
//! turn a completed run into a launch failure.

mod status;

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backend::{self, ExitConvention, Invocation, IsolationBackend, LaunchPlan};
use crate::config::{Config, InterpreterConfig, LimitsConfig};
use crate::identity::Identity;
use crate::request::ExecutionRequest;
use crate::restrict::ResourceLimits;
use crate::unit::ExecutionUnit;

use self::status::StatusPipe;

/// stderr of a timed-out execution.
pub const TIMEOUT_MESSAGE: &str = "Execution timed out";

/// Exit code reported for a timed-out execution.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// How long capture tasks get to hit EOF once the process group is dead.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

const READ_CHUNK: usize = 8 * 1024;

/// Ceilings for one execution, derived from the request timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// In-jail CPU ceiling.
    pub cpu_seconds: u64,
    /// Supervisor wall-clock deadline; always longer than `cpu_seconds`.
    pub wall_deadline: Duration,
    pub memory_bytes: u64,
    pub output_bytes: u64,
}

impl ExecutionLimits {
    pub fn for_request(timeout_seconds: u64, limits: &LimitsConfig) -> Self {
        Self {
            cpu_seconds: timeout_seconds,
            wall_deadline: Duration::from_secs(timeout_seconds)
                + Duration::from_millis(limits.deadline_grace_ms),
            memory_bytes: limits.memory_bytes(),
            output_bytes: limits.output_bytes(),
        }
    }

    /// The triple the guest runner installs on itself.
    pub const fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_seconds: self.cpu_seconds,
            memory_bytes: self.memory_bytes,
            output_bytes: self.output_bytes,
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// Normal exit, any status.
    Exited { code: i32 },
    /// Killed by a signal unrelated to the sandbox limits.
    Signaled { signal: i32 },
    /// Killed by the syscall filter (`SIGSYS`).
    SyscallDenied,
    /// Killed inside the jail by the CPU ceiling or nsjail's time limit.
    TimeLimit,
    /// Still running at the wall deadline; the supervisor killed it.
    DeadlineExpired,
}

impl Termination {
    fn classify(
        status: ExitStatus,
        convention: ExitConvention,
        elapsed: Duration,
        cpu_seconds: u64,
    ) -> Self {
        let signal = status.signal().or_else(|| match (convention, status.code()) {
            (ExitConvention::ShellStyle, Some(code)) if code > 128 && code <= 128 + 64 => {
                Some(code - 128)
            }
            _ => None,
        });

        match signal {
            Some(libc::SIGSYS) => Self::SyscallDenied,
            Some(libc::SIGKILL | libc::SIGXCPU) if elapsed >= Duration::from_secs(cpu_seconds) => {
                Self::TimeLimit
            }
            Some(signal) => Self::Signaled { signal },
            None => Self::Exited {
                code: status.code().unwrap_or(-1),
            },
        }
    }

    pub const fn timed_out(self) -> bool {
        matches!(self, Self::TimeLimit | Self::DeadlineExpired)
    }

    /// Exit code as reported to callers: signals are negated.
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Exited { code } => code,
            Self::Signaled { signal } => -signal,
            Self::SyscallDenied => -libc::SIGSYS,
            Self::TimeLimit | Self::DeadlineExpired => TIMEOUT_EXIT_CODE,
        }
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub termination: Termination,
    /// Output beyond the per-stream cap was discarded.
    pub truncated: bool,
}

impl ExecutionResult {
    pub const fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Host-side failures. Guest misbehaviour is never one of these.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("failed to create execution unit: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to create status pipe: {0}")]
    StatusPipe(#[source] std::io::Error),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for isolated process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("isolated process could not confine itself: {0}")]
    RestrictionSetup(String),
}

/// Static facts about the sandbox, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxDescription {
    pub isolation: String,
    pub interpreter: String,
    pub user: String,
    pub group: String,
    pub memory_mb: u64,
    pub output_mb: u64,
    pub max_timeout_seconds: u64,
    pub deny_action: String,
}

/// Something that runs execution requests.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, OrchestrationError>;

    fn describe(&self) -> SandboxDescription;
}

/// Runs each request in its own isolated process.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    backend: Arc<dyn IsolationBackend>,
    identity: Identity,
    runner: PathBuf,
    interpreter: InterpreterConfig,
    limits: LimitsConfig,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn IsolationBackend>,
        identity: Identity,
        runner: PathBuf,
        interpreter: InterpreterConfig,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            backend,
            identity,
            runner,
            interpreter,
            limits,
        }
    }

    /// Build from configuration. The runner defaults to this executable.
    pub fn from_config(config: &Config, identity: Identity) -> anyhow::Result<Self> {
        let runner = match &config.isolation.runner {
            Some(path) => path.clone(),
            None => std::env::current_exe().context("Failed to locate guest runner executable")?,
        };
        if !config.interpreter.path.exists() {
            warn!(path = %config.interpreter.path.display(), "Interpreter not found on this host");
        }

        Ok(Self::new(
            backend::from_config(&config.isolation),
            identity,
            runner,
            config.interpreter.clone(),
            config.limits.clone(),
        ))
    }

    /// Run one request to completion.
    #[instrument(skip(self, request), fields(backend = self.backend.name(), timeout = request.timeout_seconds()))]
    pub async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, OrchestrationError> {
        let limits = ExecutionLimits::for_request(request.timeout_seconds(), &self.limits);

        let owner = self.backend.unit_owner(&self.identity);
        let unit = ExecutionUnit::create(request.code(), &self.interpreter.extension, owner)
            .map_err(OrchestrationError::Workspace)?;
        let execution_id = unit.id();

        let invocation = self.backend.invocation(&LaunchPlan {
            unit: &unit,
            limits: &limits,
            identity: &self.identity,
            interpreter: &self.interpreter,
            runner: &self.runner,
            deny_action: self.limits.deny_action,
        });
        debug!(
            %execution_id,
            program = %invocation.program.display(),
            args = ?invocation.args,
            "Launching isolated process"
        );

        let outcome = supervise(&invocation, &limits).await;

        if let Err(e) = unit.close() {
            warn!(%execution_id, error = %e, "Failed to remove execution unit");
        }

        let result = interpret(outcome?, invocation.exit_convention, &limits)?;

        info!(
            %execution_id,
            is_success = result.is_success(),
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "Execution finished"
        );
        Ok(result)
    }
}

#[async_trait]
impl Executor for Orchestrator {
    async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, OrchestrationError> {
        self.run(request).await
    }

    fn describe(&self) -> SandboxDescription {
        SandboxDescription {
            isolation: self.backend.name().to_string(),
            interpreter: self.interpreter.path.display().to_string(),
            user: self.identity.user.clone(),
            group: self.identity.group.clone(),
            memory_mb: self.limits.memory_mb,
            output_mb: self.limits.output_mb,
            max_timeout_seconds: self.limits.max_timeout_seconds,
            deny_action: self.limits.deny_action.as_str().to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A running capture task and the buffer it fills.
struct Capture {
    sink: Arc<Mutex<Captured>>,
    task: JoinHandle<()>,
}

struct RawOutcome {
    /// `None` when the wall deadline fired.
    status: Option<ExitStatus>,
    elapsed: Duration,
    stdout: Captured,
    stderr: Captured,
    /// What the runner wrote to the status pipe.
    launch_failure: Option<String>,
}

async fn supervise(
    invocation: &Invocation,
    limits: &ExecutionLimits,
) -> Result<RawOutcome, OrchestrationError> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .current_dir(&invocation.cwd)
        .env_clear()
        .envs(invocation.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    if let Some((uid, gid)) = invocation.credentials {
        cmd.uid(uid).gid(gid);
    }

    let mut status_pipe = StatusPipe::new().map_err(OrchestrationError::StatusPipe)?;
    status_pipe.install(&mut cmd);

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| OrchestrationError::Spawn {
        program: invocation.program.display().to_string(),
        source,
    })?;
    status_pipe.close_writer();
    let pgid = child.id().and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw);

    let cap = usize::try_from(limits.output_bytes).unwrap_or(usize::MAX);
    let stdout = child.stdout.take().map(|out| start_capture(out, cap));
    let stderr = child.stderr.take().map(|err| start_capture(err, cap));

    let waited = tokio::time::timeout(limits.wall_deadline, child.wait()).await;

    // On timeout this is the runaway tree; after a normal exit, stragglers.
    if let Some(pgid) = pgid {
        kill_group(pgid);
    }

    let status = match waited {
        Ok(status) => Some(status.map_err(OrchestrationError::Wait)?),
        Err(_) => {
            warn!(deadline = ?limits.wall_deadline, "Wall deadline expired, process group killed");
            child.kill().await.map_err(OrchestrationError::Wait)?;
            None
        }
    };
    let elapsed = started.elapsed();

    Ok(RawOutcome {
        status,
        elapsed,
        stdout: collect(stdout).await,
        stderr: collect(stderr).await,
        launch_failure: status_pipe.take_report(),
    })
}

fn kill_group(pgid: Pid) {
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "Failed to kill process group"),
    }
}

fn start_capture<R>(reader: R, cap: usize) -> Capture
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let sink = Arc::new(Mutex::new(Captured::default()));
    let task = tokio::spawn(capture(reader, cap, Arc::clone(&sink)));
    Capture { sink, task }
}

/// Read `reader` to EOF into `sink`, keeping at most `cap` bytes.
async fn capture<R: AsyncRead + Unpin>(mut reader: R, cap: usize, sink: Arc<Mutex<Captured>>) {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
                let take = n.min(cap.saturating_sub(captured.bytes.len()));
                captured.bytes.extend_from_slice(&chunk[..take]);
                captured.truncated |= take < n;
            }
            Err(e) => {
                debug!(error = %e, "Output stream read failed");
                break;
            }
        }
    }
}

/// Wait briefly for EOF, then take whatever was captured.
async fn collect(capture: Option<Capture>) -> Captured {
    let Some(Capture { sink, mut task }) = capture else {
        return Captured::default();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Output capture task failed"),
        Err(_) => {
            task.abort();
            warn!("Output stream still open after the process group was killed, keeping partial output");
        }
    }
    let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::take(&mut *captured)
}

fn interpret(
    raw: RawOutcome,
    convention: ExitConvention,
    limits: &ExecutionLimits,
) -> Result<ExecutionResult, OrchestrationError> {
    if let Some(report) = raw.launch_failure {
        return Err(OrchestrationError::RestrictionSetup(report));
    }

    let stdout = String::from_utf8_lossy(&raw.stdout.bytes).into_owned();
    let stderr = String::from_utf8_lossy(&raw.stderr.bytes).into_owned();
    let truncated = raw.stdout.truncated || raw.stderr.truncated;

    let termination = raw.status.map_or(Termination::DeadlineExpired, |status| {
        Termination::classify(status, convention, raw.elapsed, limits.cpu_seconds)
    });

    if termination.timed_out() {
        return Ok(ExecutionResult {
            stdout,
            stderr: TIMEOUT_MESSAGE.to_string(),
            exit_code: TIMEOUT_EXIT_CODE,
            timed_out: true,
            termination,
            truncated,
        });
    }

    Ok(ExecutionResult {
        stdout,
        stderr,
        exit_code: termination.exit_code(),
        timed_out: false,
        termination,
        truncated,
    })
}
