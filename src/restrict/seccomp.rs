//! Seccomp-BPF allowlist filter.
//!
//! ## Program layout
//!
//! ```text
//! [0-2]  architecture check (kill on mismatch)
//! [3]    load syscall number
//! [4-5]  x32 ABI rejection (x86_64 only)
//! ...    one block per rule, in policy order
//! [N]    RET default action
//! ```
//!
//! A rule without a predicate is two instructions: `JEQ nr` falling through
//! to `RET ALLOW`. A rule with a predicate is
//! `JEQ nr | checks... | RET ALLOW | LD nr`; a failed check jumps to the
//! trailing reload so the next block sees the syscall number again. Every
//! jump is local to its block, so the u8 jump offsets never overflow no
//! matter how long the allowlist grows.
//!
//! The filter is inherited across `execve` and can never be removed.

use std::str::FromStr;

use serde::Deserialize;

use super::RestrictionError;

const SECCOMP_SET_MODE_FILTER: u32 = 1;
const SECCOMP_FILTER_FLAG_TSYNC: u32 = 1;

const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_DATA: u32 = 0x0000_ffff;

// BPF instruction classes and fields
const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JEQ: u16 = 0x10;
#[cfg(target_arch = "x86_64")]
const BPF_JGE: u16 = 0x30;
const BPF_JSET: u16 = 0x40;
const BPF_K: u16 = 0x00;

/// Kernel limit on classic BPF program length.
const BPF_MAXINSNS: usize = 4096;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH_NATIVE: u32 = 0xc000_003e;
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH_NATIVE: u32 = 0xc000_00b7;

#[cfg(target_arch = "x86_64")]
const X32_SYSCALL_BIT: u32 = 0x4000_0000;

// seccomp_data offsets (little-endian)
const OFFSET_NR: u32 = 0;
const OFFSET_ARCH: u32 = 4;
const OFFSET_ARGS: u32 = 16;

const STDOUT_FD: u64 = 1;
const STDERR_FD: u64 = 2;

/// `open`/`openat` flags that grant write access or create files.
const WRITE_OPEN_FLAGS: u32 =
    (libc::O_WRONLY | libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC | libc::O_APPEND) as u32;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    const fn stmt(code: u16, k: u32) -> Self {
        Self {
            code,
            jt: 0,
            jf: 0,
            k,
        }
    }

    const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

#[repr(C)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

/// What happens to a syscall outside the allowlist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyAction {
    /// Fail the call with `EPERM`; guest code sees an ordinary error.
    #[default]
    Errno,
    /// Kill the process with `SIGSYS`.
    Kill,
}

impl DenyAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Errno => "errno",
            Self::Kill => "kill",
        }
    }

    const fn ret_value(self) -> u32 {
        match self {
            Self::Errno => SECCOMP_RET_ERRNO | (libc::EPERM as u32 & SECCOMP_RET_DATA),
            Self::Kill => SECCOMP_RET_KILL_PROCESS,
        }
    }
}

impl FromStr for DenyAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "errno" => Ok(Self::Errno),
            "kill" => Ok(Self::Kill),
            other => Err(format!("unknown deny action '{other}' (expected errno or kill)")),
        }
    }
}

/// Condition on one syscall argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPredicate {
    /// All 64 bits of the argument equal `value`.
    Equals { index: u8, value: u64 },
    /// None of the `mask` bits are set in the argument's low 32 bits.
    MaskClear { index: u8, mask: u32 },
}

/// One step of a predicate before jump offsets are known.
enum Check {
    Load(u32),
    FailUnlessEq(u32),
    FailIfAnySet(u32),
}

impl Check {
    const fn resolve(self, to_reload: u8) -> SockFilter {
        match self {
            Self::Load(offset) => SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, offset),
            Self::FailUnlessEq(value) => {
                SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, value, 0, to_reload)
            }
            Self::FailIfAnySet(mask) => {
                SockFilter::jump(BPF_JMP | BPF_JSET | BPF_K, mask, to_reload, 0)
            }
        }
    }
}

impl ArgPredicate {
    fn checks(self) -> Result<Vec<Check>, RestrictionError> {
        let index = match self {
            Self::Equals { index, .. } | Self::MaskClear { index, .. } => index,
        };
        if index > 5 {
            return Err(RestrictionError::FilterCompile(format!(
                "syscall argument index {index} out of range"
            )));
        }
        let low = OFFSET_ARGS + 8 * u32::from(index);

        Ok(match self {
            #[allow(clippy::cast_possible_truncation)]
            Self::Equals { value, .. } => vec![
                Check::Load(low),
                Check::FailUnlessEq(value as u32),
                Check::Load(low + 4),
                Check::FailUnlessEq((value >> 32) as u32),
            ],
            Self::MaskClear { mask, .. } => vec![Check::Load(low), Check::FailIfAnySet(mask)],
        })
    }
}

/// A single allowlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallRule {
    pub name: &'static str,
    pub nr: libc::c_long,
    pub predicate: Option<ArgPredicate>,
}

impl SyscallRule {
    fn emit(&self, program: &mut Vec<SockFilter>) -> Result<(), RestrictionError> {
        let nr = u32::try_from(self.nr).map_err(|_| {
            RestrictionError::FilterCompile(format!("invalid syscall number for {}", self.name))
        })?;

        let Some(predicate) = self.predicate else {
            program.push(SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, nr, 0, 1));
            program.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));
            return Ok(());
        };

        let checks = predicate.checks()?;
        let n = checks.len();
        // checks + RET ALLOW + reload
        program.push(SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, nr, 0, offset(n + 2)?));
        for (i, check) in checks.into_iter().enumerate() {
            program.push(check.resolve(offset(n - i)?));
        }
        program.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));
        program.push(SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_NR));
        Ok(())
    }
}

fn offset(distance: usize) -> Result<u8, RestrictionError> {
    u8::try_from(distance)
        .map_err(|_| RestrictionError::FilterCompile(format!("jump of {distance} overflows")))
}

/// Ordered allowlist plus a default action for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallPolicy {
    rules: Vec<SyscallRule>,
    default_action: DenyAction,
}

impl SyscallPolicy {
    /// An empty allowlist: every syscall gets `default_action`.
    pub const fn deny_all(default_action: DenyAction) -> Self {
        Self {
            rules: Vec::new(),
            default_action,
        }
    }

    /// Allow `nr` unconditionally.
    #[must_use]
    pub fn allow(mut self, name: &'static str, nr: libc::c_long) -> Self {
        self.rules.push(SyscallRule {
            name,
            nr,
            predicate: None,
        });
        self
    }

    /// Allow `nr` when `predicate` holds.
    #[must_use]
    pub fn allow_if(mut self, name: &'static str, nr: libc::c_long, predicate: ArgPredicate) -> Self {
        self.rules.push(SyscallRule {
            name,
            nr,
            predicate: Some(predicate),
        });
        self
    }

    /// Also allow writes to `fd`.
    #[must_use]
    pub fn allow_write_to(self, fd: u64) -> Self {
        self.allow_if(
            "write",
            libc::SYS_write,
            ArgPredicate::Equals { index: 0, value: fd },
        )
    }

    /// Writes to stdout/stderr and process exit. Nothing else.
    pub fn output_only(default_action: DenyAction) -> Self {
        Self::deny_all(default_action)
            .allow_if(
                "write",
                libc::SYS_write,
                ArgPredicate::Equals {
                    index: 0,
                    value: STDOUT_FD,
                },
            )
            .allow_if(
                "write",
                libc::SYS_write,
                ArgPredicate::Equals {
                    index: 0,
                    value: STDERR_FD,
                },
            )
            .allow("exit", libc::SYS_exit)
            .allow("exit_group", libc::SYS_exit_group)
    }

    /// [`Self::output_only`] plus what a host interpreter needs to start
    /// after `execve`: read-only file access, memory management, signals and
    /// clocks.
    ///
    /// Absent, and therefore denied: `fork`/`vfork`/`clone`/`clone3`, every
    /// socket call, `ptrace`, and any filesystem mutation. `execve` stays
    /// allowed for the interpreter handoff; without process creation it can
    /// only replace the current, already-confined image.
    pub fn interpreter(default_action: DenyAction) -> Self {
        let policy = Self::output_only(default_action)
            .allow("execve", libc::SYS_execve)
            // File access, read-only
            .allow_if(
                "openat",
                libc::SYS_openat,
                ArgPredicate::MaskClear {
                    index: 2,
                    mask: WRITE_OPEN_FLAGS,
                },
            )
            .allow("read", libc::SYS_read)
            .allow("pread64", libc::SYS_pread64)
            .allow("readv", libc::SYS_readv)
            .allow("close", libc::SYS_close)
            .allow("lseek", libc::SYS_lseek)
            .allow("fstat", libc::SYS_fstat)
            .allow("newfstatat", libc::SYS_newfstatat)
            .allow("statx", libc::SYS_statx)
            .allow("faccessat", libc::SYS_faccessat)
            .allow("faccessat2", libc::SYS_faccessat2)
            .allow("readlinkat", libc::SYS_readlinkat)
            .allow("getdents64", libc::SYS_getdents64)
            .allow("getcwd", libc::SYS_getcwd)
            .allow("fcntl", libc::SYS_fcntl)
            .allow("dup", libc::SYS_dup)
            .allow("dup3", libc::SYS_dup3)
            .allow_if(
                "ioctl",
                libc::SYS_ioctl,
                ArgPredicate::Equals {
                    index: 1,
                    value: libc::TCGETS as u64,
                },
            )
            .allow_if(
                "ioctl",
                libc::SYS_ioctl,
                ArgPredicate::Equals {
                    index: 1,
                    value: libc::FIOCLEX as u64,
                },
            )
            // Memory
            .allow("mmap", libc::SYS_mmap)
            .allow("mprotect", libc::SYS_mprotect)
            .allow("munmap", libc::SYS_munmap)
            .allow("mremap", libc::SYS_mremap)
            .allow("brk", libc::SYS_brk)
            .allow("madvise", libc::SYS_madvise)
            // Signals and threads of the single process
            .allow("rt_sigaction", libc::SYS_rt_sigaction)
            .allow("rt_sigprocmask", libc::SYS_rt_sigprocmask)
            .allow("rt_sigreturn", libc::SYS_rt_sigreturn)
            .allow("sigaltstack", libc::SYS_sigaltstack)
            .allow("futex", libc::SYS_futex)
            .allow("set_tid_address", libc::SYS_set_tid_address)
            .allow("set_robust_list", libc::SYS_set_robust_list)
            .allow("rseq", libc::SYS_rseq)
            // Process information
            .allow("getpid", libc::SYS_getpid)
            .allow("gettid", libc::SYS_gettid)
            .allow("getuid", libc::SYS_getuid)
            .allow("geteuid", libc::SYS_geteuid)
            .allow("getgid", libc::SYS_getgid)
            .allow("getegid", libc::SYS_getegid)
            .allow("uname", libc::SYS_uname)
            .allow("sysinfo", libc::SYS_sysinfo)
            .allow("sched_getaffinity", libc::SYS_sched_getaffinity)
            .allow("getrandom", libc::SYS_getrandom)
            // Limits may be read, never changed
            .allow_if(
                "prlimit64",
                libc::SYS_prlimit64,
                ArgPredicate::Equals { index: 2, value: 0 },
            )
            // Time
            .allow("clock_gettime", libc::SYS_clock_gettime)
            .allow("clock_getres", libc::SYS_clock_getres)
            .allow("clock_nanosleep", libc::SYS_clock_nanosleep)
            .allow("nanosleep", libc::SYS_nanosleep)
            .allow("pselect6", libc::SYS_pselect6);

        #[cfg(target_arch = "x86_64")]
        let policy = policy
            .allow_if(
                "open",
                libc::SYS_open,
                ArgPredicate::MaskClear {
                    index: 1,
                    mask: WRITE_OPEN_FLAGS,
                },
            )
            .allow("stat", libc::SYS_stat)
            .allow("lstat", libc::SYS_lstat)
            .allow("access", libc::SYS_access)
            .allow("readlink", libc::SYS_readlink)
            .allow("getdents", libc::SYS_getdents)
            .allow("dup2", libc::SYS_dup2)
            .allow("arch_prctl", libc::SYS_arch_prctl)
            .allow("select", libc::SYS_select);

        policy
    }

    pub fn rules(&self) -> &[SyscallRule] {
        &self.rules
    }

    pub const fn default_action(&self) -> DenyAction {
        self.default_action
    }

    /// Compile the policy into a classic BPF program.
    pub fn compile(&self) -> Result<Vec<SockFilter>, RestrictionError> {
        let deny = self.default_action.ret_value();

        let mut program = vec![
            SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_ARCH),
            SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, AUDIT_ARCH_NATIVE, 1, 0),
            SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS),
            SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_NR),
        ];

        // x32 syscalls share AUDIT_ARCH_X86_64 but use a different table
        #[cfg(target_arch = "x86_64")]
        {
            program.push(SockFilter::jump(BPF_JMP | BPF_JGE | BPF_K, X32_SYSCALL_BIT, 0, 1));
            program.push(SockFilter::stmt(BPF_RET | BPF_K, deny));
        }

        for rule in &self.rules {
            rule.emit(&mut program)?;
        }
        program.push(SockFilter::stmt(BPF_RET | BPF_K, deny));

        if program.len() > BPF_MAXINSNS {
            return Err(RestrictionError::FilterCompile(format!(
                "program has {} instructions, kernel limit is {BPF_MAXINSNS}",
                program.len()
            )));
        }
        Ok(program)
    }
}

/// Install `program` on every thread of the calling process.
#[allow(unsafe_code)]
pub(super) fn activate(program: &[SockFilter]) -> Result<(), RestrictionError> {
    nix::sys::prctl::set_no_new_privs().map_err(RestrictionError::NoNewPrivs)?;

    let len = u16::try_from(program.len()).map_err(|_| {
        RestrictionError::FilterCompile(format!("program too long: {}", program.len()))
    })?;
    let fprog = SockFprog {
        len,
        filter: program.as_ptr(),
    };

    // SAFETY: `fprog` points into `program`, which outlives the call; the
    // kernel copies the instructions before returning.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_SET_MODE_FILTER,
            SECCOMP_FILTER_FLAG_TSYNC,
            std::ptr::addr_of!(fprog),
        )
    };

    match ret {
        0 => Ok(()),
        tid if tid > 0 => Err(RestrictionError::FilterActivate(std::io::Error::other(
            format!("thread {tid} could not be synchronized"),
        ))),
        _ => Err(RestrictionError::FilterActivate(std::io::Error::last_os_error())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal `seccomp_data`.
    struct Data {
        nr: libc::c_long,
        arch: u32,
        args: [u64; 6],
    }

    impl Data {
        fn call(nr: libc::c_long, args: &[u64]) -> Self {
            let mut all = [0u64; 6];
            all[..args.len()].copy_from_slice(args);
            Self {
                nr,
                arch: AUDIT_ARCH_NATIVE,
                args: all,
            }
        }

        fn word(&self, offset: u32) -> u32 {
            match offset {
                OFFSET_NR => self.nr as u32,
                OFFSET_ARCH => self.arch,
                off if off >= OFFSET_ARGS => {
                    let rel = off - OFFSET_ARGS;
                    let arg = self.args[(rel / 8) as usize];
                    if rel % 8 == 0 {
                        arg as u32
                    } else {
                        (arg >> 32) as u32
                    }
                }
                other => panic!("unexpected load offset {other}"),
            }
        }
    }

    /// Classic BPF evaluator covering the opcodes the compiler emits.
    fn evaluate(program: &[SockFilter], data: &Data) -> u32 {
        let mut acc = 0u32;
        let mut pc = 0usize;
        loop {
            let ins = program[pc];
            let taken = |cond: bool| usize::from(if cond { ins.jt } else { ins.jf });
            match ins.code {
                c if c == BPF_LD | BPF_W | BPF_ABS => {
                    acc = data.word(ins.k);
                    pc += 1;
                }
                c if c == BPF_JMP | BPF_JEQ | BPF_K => pc += 1 + taken(acc == ins.k),
                c if c == BPF_JMP | BPF_JSET | BPF_K => pc += 1 + taken(acc & ins.k != 0),
                #[cfg(target_arch = "x86_64")]
                c if c == BPF_JMP | BPF_JGE | BPF_K => pc += 1 + taken(acc >= ins.k),
                c if c == BPF_RET | BPF_K => return ins.k,
                other => panic!("unexpected opcode {other:#x}"),
            }
        }
    }

    const DENIED: u32 = SECCOMP_RET_ERRNO | libc::EPERM as u32;

    /// Whether any rule names `nr`, with or without a predicate.
    fn mentions(policy: &SyscallPolicy, nr: libc::c_long) -> bool {
        policy.rules().iter().any(|rule| rule.nr == nr)
    }

    fn verdict(policy: &SyscallPolicy, nr: libc::c_long, args: &[u64]) -> u32 {
        let program = policy.compile().unwrap();
        evaluate(&program, &Data::call(nr, args))
    }

    #[test]
    fn output_only_allows_stdout_stderr_and_exit() {
        let policy = SyscallPolicy::output_only(DenyAction::Errno);
        assert_eq!(policy.rules().len(), 4);

        assert_eq!(verdict(&policy, libc::SYS_write, &[1]), SECCOMP_RET_ALLOW);
        assert_eq!(verdict(&policy, libc::SYS_write, &[2]), SECCOMP_RET_ALLOW);
        assert_eq!(verdict(&policy, libc::SYS_exit, &[0]), SECCOMP_RET_ALLOW);
        assert_eq!(verdict(&policy, libc::SYS_exit_group, &[0]), SECCOMP_RET_ALLOW);
    }

    #[test]
    fn output_only_denies_everything_else() {
        let policy = SyscallPolicy::output_only(DenyAction::Errno);

        assert_eq!(verdict(&policy, libc::SYS_write, &[0]), DENIED);
        assert_eq!(verdict(&policy, libc::SYS_write, &[3]), DENIED);
        // High bits must match too
        assert_eq!(verdict(&policy, libc::SYS_write, &[(1 << 32) | 1]), DENIED);
        assert_eq!(verdict(&policy, libc::SYS_read, &[0]), DENIED);
        assert_eq!(verdict(&policy, libc::SYS_execve, &[]), DENIED);
        assert_eq!(verdict(&policy, libc::SYS_socket, &[2, 1, 0]), DENIED);
    }

    #[test]
    fn interpreter_denies_process_creation_and_network() {
        let policy = SyscallPolicy::interpreter(DenyAction::Errno);

        for nr in [
            libc::SYS_clone,
            libc::SYS_clone3,
            libc::SYS_socket,
            libc::SYS_connect,
            libc::SYS_ptrace,
            libc::SYS_unlinkat,
            libc::SYS_mkdirat,
            libc::SYS_renameat2,
            libc::SYS_setuid,
        ] {
            assert!(!mentions(&policy, nr), "syscall {nr} must not be allowlisted");
            assert_eq!(verdict(&policy, nr, &[]), DENIED, "syscall {nr}");
        }

        #[cfg(target_arch = "x86_64")]
        for nr in [libc::SYS_fork, libc::SYS_vfork] {
            assert_eq!(verdict(&policy, nr, &[]), DENIED);
        }
    }

    #[test]
    fn interpreter_allows_bootstrap_calls() {
        let policy = SyscallPolicy::interpreter(DenyAction::Errno);

        assert_eq!(verdict(&policy, libc::SYS_execve, &[]), SECCOMP_RET_ALLOW);
        assert_eq!(verdict(&policy, libc::SYS_mmap, &[]), SECCOMP_RET_ALLOW);
        assert_eq!(verdict(&policy, libc::SYS_read, &[3]), SECCOMP_RET_ALLOW);
        assert_eq!(verdict(&policy, libc::SYS_write, &[1]), SECCOMP_RET_ALLOW);
        assert_eq!(verdict(&policy, libc::SYS_write, &[5]), DENIED);
    }

    #[test]
    fn extra_write_fd_is_exact() {
        let policy = SyscallPolicy::interpreter(DenyAction::Errno).allow_write_to(3);

        assert_eq!(verdict(&policy, libc::SYS_write, &[3]), SECCOMP_RET_ALLOW);
        assert_eq!(verdict(&policy, libc::SYS_write, &[4]), DENIED);
        assert_eq!(verdict(&policy, libc::SYS_write, &[0]), DENIED);
    }

    #[test]
    fn openat_is_read_only() {
        let policy = SyscallPolicy::interpreter(DenyAction::Errno);
        let at_fdcwd = libc::AT_FDCWD as u64;
        let flags = |f: libc::c_int| f as u64;

        assert_eq!(
            verdict(&policy, libc::SYS_openat, &[at_fdcwd, 0x1000, flags(libc::O_RDONLY | libc::O_CLOEXEC)]),
            SECCOMP_RET_ALLOW
        );
        assert_eq!(
            verdict(&policy, libc::SYS_openat, &[at_fdcwd, 0x1000, flags(libc::O_WRONLY | libc::O_CREAT)]),
            DENIED
        );
        assert_eq!(
            verdict(&policy, libc::SYS_openat, &[at_fdcwd, 0x1000, flags(libc::O_RDWR)]),
            DENIED
        );
        assert_eq!(
            verdict(&policy, libc::SYS_openat, &[at_fdcwd, 0x1000, flags(libc::O_APPEND)]),
            DENIED
        );
    }

    #[test]
    fn prlimit_is_query_only() {
        let policy = SyscallPolicy::interpreter(DenyAction::Errno);
        let rlimit_as = libc::RLIMIT_AS as u64;

        assert_eq!(
            verdict(&policy, libc::SYS_prlimit64, &[0, rlimit_as, 0, 0x7fff_0000]),
            SECCOMP_RET_ALLOW
        );
        assert_eq!(
            verdict(&policy, libc::SYS_prlimit64, &[0, rlimit_as, 0x7fff_0000, 0]),
            DENIED
        );
    }

    #[test]
    fn ioctl_only_allows_listed_requests() {
        let policy = SyscallPolicy::interpreter(DenyAction::Errno);

        assert_eq!(
            verdict(&policy, libc::SYS_ioctl, &[1, libc::TCGETS as u64]),
            SECCOMP_RET_ALLOW
        );
        assert_eq!(
            verdict(&policy, libc::SYS_ioctl, &[1, libc::TIOCSTI as u64]),
            DENIED
        );
    }

    #[test]
    fn kill_action_kills() {
        let policy = SyscallPolicy::interpreter(DenyAction::Kill);
        assert_eq!(verdict(&policy, libc::SYS_socket, &[2, 1, 0]), SECCOMP_RET_KILL_PROCESS);
        assert_eq!(verdict(&policy, libc::SYS_write, &[1]), SECCOMP_RET_ALLOW);
    }

    #[test]
    fn foreign_architecture_is_killed() {
        let program = SyscallPolicy::interpreter(DenyAction::Errno).compile().unwrap();
        let mut data = Data::call(libc::SYS_write, &[1]);
        data.arch = 0x4000_0003; // AUDIT_ARCH_I386
        assert_eq!(evaluate(&program, &data), SECCOMP_RET_KILL_PROCESS);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn x32_syscalls_are_denied() {
        let policy = SyscallPolicy::interpreter(DenyAction::Errno);
        let x32_write = libc::SYS_write | libc::c_long::from(X32_SYSCALL_BIT as i32);
        assert_eq!(verdict(&policy, x32_write, &[1]), DENIED);
    }

    #[test]
    fn program_layout() {
        let program = SyscallPolicy::output_only(DenyAction::Errno).compile().unwrap();

        assert_eq!(program[0], SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_ARCH));
        assert_eq!(program[1].k, AUDIT_ARCH_NATIVE);
        assert_eq!(program.last(), Some(&SockFilter::stmt(BPF_RET | BPF_K, DENIED)));

        // header + x32 guard + 2 predicated writes (4 checks + 3 each) + 2 plain rules
        let header = if cfg!(target_arch = "x86_64") { 6 } else { 4 };
        assert_eq!(program.len(), header + 2 * 7 + 2 * 2 + 1);
    }

    #[test]
    fn out_of_range_argument_is_a_compile_error() {
        let policy = SyscallPolicy::deny_all(DenyAction::Errno).allow_if(
            "write",
            libc::SYS_write,
            ArgPredicate::Equals { index: 6, value: 1 },
        );
        assert!(matches!(
            policy.compile(),
            Err(RestrictionError::FilterCompile(_))
        ));
    }

    #[test]
    fn deny_action_parses() {
        assert_eq!("errno".parse::<DenyAction>(), Ok(DenyAction::Errno));
        assert_eq!("kill".parse::<DenyAction>(), Ok(DenyAction::Kill));
        assert!("trap".parse::<DenyAction>().is_err());
        assert_eq!(DenyAction::Kill.as_str(), "kill");
    }
}
