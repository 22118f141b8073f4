//! Self-restriction applied by the guest runner before any guest code runs.
//!
//! The order is fixed: resource ceilings first, then the syscall filter is
//! compiled, then it is activated. Ceilings go first because the filter would
//! otherwise deny the `prlimit64` calls needed to install them. Once
//! [`restrict_self`] returns `Ok`, both layers hold for the rest of the
//! process's life and for everything it `execve`s into.

mod limits;
mod seccomp;

pub use limits::ResourceLimits;
pub use seccomp::{ArgPredicate, DenyAction, SockFilter, SyscallPolicy, SyscallRule};

use thiserror::Error;

/// Exit status of a runner that could not confine itself.
pub const RESTRICTION_FAILURE_EXIT: i32 = 121;

/// Prefix of the failure report a runner writes to its status pipe (and to
/// stderr) before exiting with [`RESTRICTION_FAILURE_EXIT`]. Only the pipe
/// copy is trusted.
pub const RESTRICTION_FAILURE_MARKER: &str = "sandbox: restriction setup failed";

/// Failures while confining the current process. All are fatal.
#[derive(Debug, Error)]
pub enum RestrictionError {
    #[error("failed to query {resource} limit: {source}")]
    QueryLimit {
        resource: &'static str,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("failed to set {resource} limit to {value}: {source}")]
    SetLimit {
        resource: &'static str,
        value: u64,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("failed to compile syscall filter: {0}")]
    FilterCompile(String),

    #[error("failed to set no_new_privs: {0}")]
    NoNewPrivs(#[source] nix::errno::Errno),

    #[error("failed to activate syscall filter: {0}")]
    FilterActivate(#[source] std::io::Error),
}

/// Apply `limits`, then install `policy` on the calling process.
///
/// On error the process is in an unknown, partially restricted state and
/// must exit without running guest code.
pub fn restrict_self(
    limits: &ResourceLimits,
    policy: &SyscallPolicy,
) -> Result<(), RestrictionError> {
    limits.apply()?;
    let program = policy.compile()?;
    seccomp::activate(&program)
}
