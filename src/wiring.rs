//! Descriptor plumbing for pipelines and output redirection.
//!
//! Everything created here is close-on-exec. A descriptor only survives into
//! the executed program by being rebound onto stdin/stdout, which clears the
//! flag on the new number.

use std::ffi::CStr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2};

use crate::error::ChildError;

/// Pipe endpoint pair. Dropping it closes both ends.
#[derive(Debug)]
pub struct Pipe {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl Pipe {
    pub fn new() -> nix::Result<Pipe> {
        let (read, write) = cloexec_pipe()?;
        Ok(Pipe { read, write })
    }

    pub fn ends(&self) -> (RawFd, RawFd) {
        (self.read.as_raw_fd(), self.write.as_raw_fd())
    }
}

#[cfg(not(target_vendor = "apple"))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC)
}

#[cfg(target_vendor = "apple")]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    let (read, write) = nix::unistd::pipe()?;
    fcntl(read.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    fcntl(write.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok((read, write))
}

/// Child-side descriptor setup, applied after the signal reset and before exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wiring<'a> {
    Inherit,
    /// Left side of a pipeline: stdout goes into the pipe.
    PipeWriter { read: RawFd, write: RawFd },
    /// Right side of a pipeline: stdin comes from the pipe.
    PipeReader { read: RawFd, write: RawFd },
    /// stdout goes to a freshly truncated file.
    RedirectStdout { path: &'a CStr, mode: u32 },
}

impl<'a> Wiring<'a> {
    /// Runs in the forked child only.
    pub(crate) fn apply(&self) -> Result<(), ChildError<'a>> {
        match *self {
            Wiring::Inherit => Ok(()),
            Wiring::PipeWriter { read, write } => {
                let _ = close(read);
                rebind(write, libc::STDOUT_FILENO)
                    .map_err(|source| ChildError::Wiring { stream: "stdout", source })
            }
            Wiring::PipeReader { read, write } => {
                let _ = close(write);
                rebind(read, libc::STDIN_FILENO)
                    .map_err(|source| ChildError::Wiring { stream: "stdin", source })
            }
            Wiring::RedirectStdout { path, mode } => {
                let fd = open(
                    path,
                    OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC | OFlag::O_CLOEXEC,
                    Mode::from_bits_truncate(mode as libc::mode_t),
                )
                .map_err(|source| ChildError::Redirect { path, source })?;
                rebind(fd, libc::STDOUT_FILENO)
                    .map_err(|source| ChildError::Redirect { path, source })
            }
        }
    }
}

/// Move `fd` onto `target`, leaving only `target` open and inheritable.
fn rebind(fd: RawFd, target: RawFd) -> Result<(), Errno> {
    if fd == target {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
        return Ok(());
    }
    dup2(fd, target)?;
    close(fd)?;
    Ok(())
}
