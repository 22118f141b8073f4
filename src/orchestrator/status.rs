//! Status pipe between the supervisor and the guest runner.
//!
//! The supervisor keeps the read end. The write end reaches the launched
//! process only, at [`STATUS_FD`]. The runner marks it close-on-exec, so the
//! interpreter never holds it; anything read from it is a runner setup
//! failure.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::unistd::{dup2, pipe2};
use tokio::process::Command;

use crate::backend::STATUS_FD;

const MAX_REPORT: usize = 4096;

pub(super) struct StatusPipe {
    reader: File,
    writer: Option<OwnedFd>,
}

impl StatusPipe {
    pub(super) fn new() -> io::Result<Self> {
        let (reader, writer) = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
        Ok(Self {
            reader: File::from(reader),
            writer: Some(writer),
        })
    }

    /// Hand the write end to `cmd`'s child at [`STATUS_FD`].
    #[allow(unsafe_code)]
    pub(super) fn install(&self, cmd: &mut Command) {
        let Some(writer) = &self.writer else {
            return;
        };
        let fd = writer.as_raw_fd();

        // SAFETY: the hook runs in the forked child before exec and only
        // calls the async-signal-safe dup2 and fcntl.
        unsafe {
            cmd.pre_exec(move || {
                if fd == STATUS_FD {
                    fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
                } else {
                    dup2(fd, STATUS_FD)?;
                }
                Ok(())
            });
        }
    }

    /// Drop the supervisor's copy of the write end once the child is spawned.
    pub(super) fn close_writer(&mut self) {
        self.writer = None;
    }

    /// The runner's failure report, if it wrote one.
    pub(super) fn take_report(&mut self) -> Option<String> {
        let mut report = Vec::new();
        let mut chunk = [0u8; 512];
        while report.len() < MAX_REPORT {
            match self.reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => report.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // WouldBlock: a straggler still holds the write end
                Err(_) => break,
            }
        }
        let report = String::from_utf8_lossy(&report).trim().to_string();
        (!report.is_empty()).then_some(report)
    }
}
