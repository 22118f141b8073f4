//! Guest runner: the process that confines itself and becomes the interpreter.
//!
//! Runs as the hidden `guest` subcommand, single-threaded, with no logging
//! subscriber. Its stderr belongs to guest code, so setup failures are
//! reported to the supervisor on a separate status pipe. The pipe is
//! close-on-exec: a successful `execve` closes it with nothing written, and
//! the interpreter never holds it.

use std::convert::Infallible;
use std::ffi::{CString, NulError};
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::execve;
use thiserror::Error;

use crate::restrict::{
    restrict_self, DenyAction, ResourceLimits, RestrictionError, SyscallPolicy,
    RESTRICTION_FAILURE_EXIT, RESTRICTION_FAILURE_MARKER,
};

/// Everything the runner needs to confine itself and hand over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestLaunch {
    pub limits: ResourceLimits,
    pub deny_action: DenyAction,
    /// Interpreter to `execve`.
    pub program: PathBuf,
    /// Interpreter arguments, source path last.
    pub args: Vec<String>,
    /// Inherited write end of the supervisor's status pipe.
    pub status_fd: Option<RawFd>,
}

#[derive(Debug, Error)]
enum GuestError {
    #[error("argument contains a NUL byte: {0}")]
    Nul(#[from] NulError),

    #[error(transparent)]
    Restriction(#[from] RestrictionError),

    #[error("failed to mark status pipe close-on-exec: {0}")]
    StatusPipe(#[source] nix::errno::Errno),

    #[error("failed to exec {program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: nix::errno::Errno,
    },
}

/// Confine the current process and replace it with the interpreter.
///
/// Never returns. If confinement or the exec fails, the error goes to the
/// status pipe (and stderr) and the process exits with
/// [`RESTRICTION_FAILURE_EXIT`]; guest code does not run.
pub fn run(launch: &GuestLaunch) -> ! {
    let mut status = launch.status_fd.and_then(adopt_status_fd);
    match enter(launch, status.as_ref()) {
        Ok(never) => match never {},
        Err(e) => {
            report(status.as_mut(), &e);
            std::process::exit(RESTRICTION_FAILURE_EXIT)
        }
    }
}

fn enter(launch: &GuestLaunch, status: Option<&File>) -> Result<Infallible, GuestError> {
    // Everything that allocates is prepared while allocation is unrestricted.
    let program = CString::new(launch.program.as_os_str().as_bytes())?;
    let argv = std::iter::once(Ok(program.clone()))
        .chain(launch.args.iter().map(|arg| CString::new(arg.as_str())))
        .collect::<Result<Vec<_>, _>>()?;
    let env: [CString; 0] = [];

    let mut policy = SyscallPolicy::interpreter(launch.deny_action);
    if let Some(pipe) = status {
        let fd = pipe.as_raw_fd();
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(GuestError::StatusPipe)?;
        // Needed only until execve closes it
        policy = policy.allow_write_to(u64::from(fd.unsigned_abs()));
    }

    restrict_self(&launch.limits, &policy)?;

    execve(&program, &argv, &env).map_err(|source| GuestError::Exec {
        program: launch.program.display().to_string(),
        source,
    })
}

fn report(status: Option<&mut File>, error: &GuestError) {
    let message = format!("{RESTRICTION_FAILURE_MARKER}: {error}");
    if let Some(pipe) = status {
        // Nothing else can be done if the supervisor is gone
        let _ = pipe.write_all(message.as_bytes());
    }
    eprintln!("{message}");
}

/// Take ownership of an inherited descriptor. Stdio and descriptors that are
/// not open are refused.
#[allow(unsafe_code)]
fn adopt_status_fd(fd: RawFd) -> Option<File> {
    if fd <= libc::STDERR_FILENO || fcntl(fd, FcntlArg::F_GETFD).is_err() {
        return None;
    }
    // SAFETY: the descriptor is open and, being inherited solely for this
    // purpose, owned by nothing else in this process.
    Some(unsafe { File::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::os::fd::IntoRawFd;

    use super::*;

    fn launch(args: Vec<String>) -> GuestLaunch {
        GuestLaunch {
            limits: ResourceLimits {
                cpu_seconds: 1,
                memory_bytes: 1 << 20,
                output_bytes: 1 << 20,
            },
            deny_action: DenyAction::Errno,
            program: PathBuf::from("/usr/bin/python3"),
            args,
            status_fd: None,
        }
    }

    #[test]
    fn nul_in_argument_is_rejected_before_restriction() {
        let launch = launch(vec!["bad\0arg".into()]);

        // Fails at argv preparation, so the test process is never restricted.
        assert!(matches!(enter(&launch, None), Err(GuestError::Nul(_))));
    }

    #[test]
    fn failure_is_written_to_status_pipe() {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        let mut status = adopt_status_fd(write_end.into_raw_fd()).unwrap();
        let error = enter(&launch(vec!["bad\0arg".into()]), Some(&status)).unwrap_err();

        report(Some(&mut status), &error);
        drop(status);

        let mut message = String::new();
        File::from(read_end).read_to_string(&mut message).unwrap();
        assert!(message.starts_with(RESTRICTION_FAILURE_MARKER));
        assert!(message.contains("NUL"));
    }

    #[test]
    fn stdio_and_closed_descriptors_are_not_adopted() {
        assert!(adopt_status_fd(libc::STDOUT_FILENO).is_none());
        assert!(adopt_status_fd(libc::STDERR_FILENO).is_none());
        assert!(adopt_status_fd(4093).is_none());
    }
}
