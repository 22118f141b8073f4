//! Hard resource ceilings.
//!
//! | Limit          | Source                         |
//! |----------------|--------------------------------|
//! | `RLIMIT_CPU`   | `cpu_seconds`                  |
//! | `RLIMIT_AS`    | `memory_bytes`                 |
//! | `RLIMIT_FSIZE` | `output_bytes`                 |
//! | `RLIMIT_CORE`  | always 0                       |
//!
//! Soft and hard values are set equal, so the process cannot raise them back.

use nix::sys::resource::{getrlimit, setrlimit, Resource};

use super::RestrictionError;

/// CPU, address-space and output ceilings for one guest process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_seconds: u64,
    pub memory_bytes: u64,
    pub output_bytes: u64,
}

impl ResourceLimits {
    /// Install the ceilings on the calling process.
    pub fn apply(&self) -> Result<(), RestrictionError> {
        set_ceiling(Resource::RLIMIT_CPU, "cpu", self.cpu_seconds)?;
        set_ceiling(Resource::RLIMIT_AS, "address space", self.memory_bytes)?;
        set_ceiling(Resource::RLIMIT_FSIZE, "file size", self.output_bytes)?;
        set_ceiling(Resource::RLIMIT_CORE, "core", 0)
    }
}

fn set_ceiling(resource: Resource, name: &'static str, requested: u64) -> Result<(), RestrictionError> {
    let (_, hard) = getrlimit(resource).map_err(|source| RestrictionError::QueryLimit {
        resource: name,
        source,
    })?;
    let value = effective_ceiling(requested, hard);
    setrlimit(resource, value, value).map_err(|source| RestrictionError::SetLimit {
        resource: name,
        value,
        source,
    })
}

/// Ceilings only move down: an outer layer (nsjail) may already have set a
/// lower hard limit, which an unprivileged process cannot raise.
const fn effective_ceiling(requested: u64, current_hard: u64) -> u64 {
    if requested < current_hard {
        requested
    } else {
        current_hard
    }
}
