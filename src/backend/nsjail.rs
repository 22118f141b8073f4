//! nsjail backend.
//!
//! nsjail runs the guest runner once (`--mode o`) inside fresh namespaces:
//! chrooted, no loopback or other interfaces, no `/proc`, as the resolved
//! identity, with its own time and rlimit ceilings. The runner still applies
//! its own ceilings and syscall filter inside. Only the status pipe is passed
//! through besides stdio.

use std::ffi::OsString;
use std::path::PathBuf;

use super::{launcher_env, ExitConvention, Invocation, IsolationBackend, LaunchPlan, STATUS_FD};

const MIB: u64 = 1024 * 1024;

/// Backend that launches the runner through nsjail.
#[derive(Debug, Clone)]
pub struct NsjailBackend {
    nsjail: PathBuf,
    chroot: PathBuf,
}

impl NsjailBackend {
    /// Create a backend using the `nsjail` executable at `nsjail`.
    pub const fn new(nsjail: PathBuf, chroot: PathBuf) -> Self {
        Self { nsjail, chroot }
    }
}

impl IsolationBackend for NsjailBackend {
    fn name(&self) -> &'static str {
        "nsjail"
    }

    fn invocation(&self, plan: &LaunchPlan<'_>) -> Invocation {
        let limits = plan.limits;
        let mut args: Vec<OsString> = vec![
            "--quiet".into(),
            "--mode".into(),
            "o".into(),
            "--time_limit".into(),
            limits.cpu_seconds.to_string().into(),
            "--rlimit_cpu".into(),
            limits.cpu_seconds.to_string().into(),
            "--rlimit_as".into(),
            mebibytes(limits.memory_bytes).to_string().into(),
            "--rlimit_fsize".into(),
            mebibytes(limits.output_bytes).to_string().into(),
            "--chroot".into(),
            self.chroot.as_os_str().into(),
            "--cwd".into(),
            plan.unit.dir().into(),
            "--user".into(),
            plan.identity.user.as_str().into(),
            "--group".into(),
            plan.identity.group.as_str().into(),
            "--disable_proc".into(),
            "--iface_no_lo".into(),
            "--pass_fd".into(),
            STATUS_FD.to_string().into(),
            "--".into(),
        ];
        args.extend(plan.guest_command());

        Invocation {
            program: self.nsjail.clone(),
            args,
            cwd: plan.unit.dir().to_path_buf(),
            env: launcher_env(),
            credentials: None,
            exit_convention: ExitConvention::ShellStyle,
        }
    }
}

/// nsjail takes sizes in MiB; round up so the inner ceiling stays the tighter one.
const fn mebibytes(bytes: u64) -> u64 {
    let mib = bytes.div_ceil(MIB);
    if mib == 0 {
        1
    } else {
        mib
    }
}
