//! Isolation backends.
//!
//! A backend turns a prepared execution into the command line that launches
//! it. Both backends end in the same guest runner (`guest` subcommand),
//! which confines itself before the interpreter starts; nsjail adds
//! namespace, filesystem and network isolation around it.

mod direct;
mod nsjail;

pub use direct::DirectBackend;
pub use nsjail::NsjailBackend;

use std::ffi::OsString;
use std::fmt::Debug;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{InterpreterConfig, IsolationConfig, IsolationMode};
use crate::identity::Identity;
use crate::orchestrator::ExecutionLimits;
use crate::restrict::DenyAction;
use crate::unit::ExecutionUnit;

/// Descriptor number at which the guest runner finds the status pipe.
pub const STATUS_FD: RawFd = 3;

/// How the launched program reports death by signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitConvention {
    /// The OS wait status carries the signal.
    Native,
    /// The launcher exits with `128 + signal` (nsjail, shells).
    ShellStyle,
}

/// A fully resolved process launch.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: PathBuf,
    /// Complete environment of the launched process.
    pub env: Vec<(OsString, OsString)>,
    /// `(uid, gid)` to switch to at spawn time.
    pub credentials: Option<(u32, u32)>,
    pub exit_convention: ExitConvention,
}

/// Inputs for building an [`Invocation`].
#[derive(Debug, Clone, Copy)]
pub struct LaunchPlan<'a> {
    pub unit: &'a ExecutionUnit,
    pub limits: &'a ExecutionLimits,
    pub identity: &'a Identity,
    pub interpreter: &'a InterpreterConfig,
    /// Binary implementing the `guest` subcommand.
    pub runner: &'a Path,
    pub deny_action: DenyAction,
}

impl LaunchPlan<'_> {
    /// `<runner> guest --cpu-seconds .. --status-fd 3 -- <interpreter> <args..> <source>`
    pub fn guest_command(&self) -> Vec<OsString> {
        let mut command: Vec<OsString> = vec![
            self.runner.into(),
            "guest".into(),
            "--cpu-seconds".into(),
            self.limits.cpu_seconds.to_string().into(),
            "--memory-bytes".into(),
            self.limits.memory_bytes.to_string().into(),
            "--output-bytes".into(),
            self.limits.output_bytes.to_string().into(),
            "--deny".into(),
            self.deny_action.as_str().into(),
            "--status-fd".into(),
            STATUS_FD.to_string().into(),
            "--".into(),
            self.interpreter.path.as_os_str().into(),
        ];
        command.extend(self.interpreter.args.iter().map(OsString::from));
        command.push(self.unit.source().into());
        command
    }
}

/// Builds isolation invocations.
pub trait IsolationBackend: Debug + Send + Sync {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Build the launch for `plan`.
    fn invocation(&self, plan: &LaunchPlan<'_>) -> Invocation;

    /// Identity that must own the execution unit so the guest can read it.
    /// `None` leaves it owned by the daemon.
    fn unit_owner<'a>(&self, _identity: &'a Identity) -> Option<&'a Identity> {
        None
    }
}

/// Backend selected by `config.mode`.
pub fn from_config(config: &IsolationConfig) -> Arc<dyn IsolationBackend> {
    match config.mode {
        IsolationMode::Nsjail => Arc::new(NsjailBackend::new(
            config.nsjail_path.clone(),
            config.chroot.clone(),
        )),
        IsolationMode::Direct => Arc::new(DirectBackend::new()),
    }
}

/// Environment for the outer launcher: nothing but the daemon's `PATH`.
fn launcher_env() -> Vec<(OsString, OsString)> {
    std::env::var_os("PATH")
        .map(|path| vec![("PATH".into(), path)])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;

    pub(super) fn fixture() -> (ExecutionUnit, ExecutionLimits, Identity, InterpreterConfig) {
        let unit = ExecutionUnit::create("print('hi')", "py", None).unwrap();
        let limits = ExecutionLimits::for_request(3, &LimitsConfig::default());
        (unit, limits, Identity::numeric(65534), InterpreterConfig::default())
    }

    #[test]
    fn guest_command_layout() {
        let (unit, limits, identity, interpreter) = fixture();
        let plan = LaunchPlan {
            unit: &unit,
            limits: &limits,
            identity: &identity,
            interpreter: &interpreter,
            runner: Path::new("/usr/local/bin/code-sandbox-daemon"),
            deny_action: DenyAction::Errno,
        };

        let command = plan.guest_command();
        let expected: Vec<OsString> = [
            "/usr/local/bin/code-sandbox-daemon",
            "guest",
            "--cpu-seconds",
            "3",
            "--memory-bytes",
            "104857600",
            "--output-bytes",
            "5242880",
            "--deny",
            "errno",
            "--status-fd",
            "3",
            "--",
            "/usr/bin/python3",
            "-I",
            "-B",
        ]
        .into_iter()
        .map(OsString::from)
        .chain(std::iter::once(unit.source().as_os_str().to_owned()))
        .collect();

        assert_eq!(command, expected);
    }

    #[test]
    fn from_config_selects_backend() {
        let mut config = IsolationConfig::default();
        assert_eq!(from_config(&config).name(), "nsjail");

        config.mode = IsolationMode::Direct;
        assert_eq!(from_config(&config).name(), "direct");
    }
}
