//! Process creation and the parent-side wait discipline.

use std::ffi::{CStr, CString};
use std::io::{self, Write};
use std::os::fd::OwnedFd;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};
use tracing::debug;

use crate::error::{ChildError, DispatchError, ShapeError};
use crate::signals::ChildSignals;
use crate::wiring::Wiring;

/// Exit code reported when a child did not exit normally.
pub const ABNORMAL_EXIT: i32 = -1;

/// The process-creating system calls, replaceable for fault injection.
pub trait Os {
    fn pipe(&self) -> nix::Result<(OwnedFd, OwnedFd)>;

    /// # Safety
    /// Same contract as [`nix::unistd::fork`]: the child may only perform
    /// async-signal-safe work before exec in a multithreaded process.
    unsafe fn fork(&self) -> nix::Result<ForkResult>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOs;

impl Os for SystemOs {
    fn pipe(&self) -> nix::Result<(OwnedFd, OwnedFd)> {
        let pipe = crate::wiring::Pipe::new()?;
        Ok((pipe.read, pipe.write))
    }

    unsafe fn fork(&self) -> nix::Result<ForkResult> {
        fork()
    }
}

/// How a foreground child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Exited(i32),
    Signaled(Signal),
    /// The status was consumed elsewhere, e.g. by kernel auto-reaping.
    Unknown,
}

impl ExitState {
    pub fn code(&self) -> i32 {
        match *self {
            ExitState::Exited(code) => code,
            ExitState::Signaled(_) | ExitState::Unknown => ABNORMAL_EXIT,
        }
    }

    pub fn success(&self) -> bool {
        *self == ExitState::Exited(0)
    }
}

impl From<WaitStatus> for ExitState {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => ExitState::Exited(code),
            WaitStatus::Signaled(_, sig, _) => ExitState::Signaled(sig),
            _ => ExitState::Unknown,
        }
    }
}

/// An argument vector converted to C strings ahead of `fork`, so the child
/// does no conversion work of its own.
#[derive(Debug)]
pub struct Prepared {
    argv: Vec<CString>,
}

impl Prepared {
    pub fn new<S: AsRef<str>>(argv: &[S]) -> Result<Self, DispatchError> {
        if argv.is_empty() {
            return Err(ShapeError::Empty.into());
        }
        let argv = argv
            .iter()
            .map(|a| cstring(a.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Prepared { argv })
    }

    pub fn program(&self) -> &CStr {
        &self.argv[0]
    }

    fn exec(&self, signals: ChildSignals, wiring: Wiring<'_>) -> ! {
        if let Err(e) = signals.apply() {
            child_exit(e);
        }
        if let Err(e) = wiring.apply() {
            child_exit(e);
        }
        let source = match execvp(self.program(), &self.argv) {
            Ok(never) => match never {},
            Err(errno) => errno,
        };
        child_exit(ChildError::Exec { program: self.program(), source })
    }
}

pub fn cstring(s: &str) -> Result<CString, DispatchError> {
    CString::new(s).map_err(|_| DispatchError::Argument(s.to_string()))
}

/// Longest child diagnostic; anything past it is cut off.
const CHILD_MESSAGE_MAX: usize = 512;

/// Report `err` on stderr and leave the child.
///
/// Another thread of the parent may have held the heap or stdio locks at fork
/// time, so the message is formatted into a stack buffer and written with a
/// single raw `write(2)`.
fn child_exit(err: ChildError<'_>) -> ! {
    let mut buf = [0u8; CHILD_MESSAGE_MAX];
    let len = format_child_message(&mut buf, &err);
    // SAFETY: buf outlives the call and len is within it; _exit skips atexit
    // handlers and stdio buffers inherited from the parent.
    unsafe {
        libc::write(libc::STDERR_FILENO, buf.as_ptr().cast(), len);
        libc::_exit(err.exit_code())
    }
}

fn format_child_message(buf: &mut [u8], err: &ChildError<'_>) -> usize {
    let mut cursor = io::Cursor::new(&mut buf[..]);
    // A full buffer only truncates the message.
    let _ = writeln!(cursor, "forksh: {err}");
    cursor.position() as usize
}

/// Fork a child that applies `signals` then `wiring` and execs `cmd`.
pub fn spawn<O: Os + ?Sized>(
    os: &O,
    cmd: &Prepared,
    signals: ChildSignals,
    wiring: Wiring<'_>,
) -> Result<Pid, DispatchError> {
    // SAFETY: between fork and exec the child only makes system calls on
    // prepared data; its one diagnostic is formatted on the stack.
    match unsafe { os.fork() }.map_err(DispatchError::Fork)? {
        ForkResult::Child => cmd.exec(signals, wiring),
        ForkResult::Parent { child } => {
            debug!(pid = %child, program = ?cmd.program(), ?wiring, "spawned");
            Ok(child)
        }
    }
}

/// Block until `pid` ends. ECHILD is benign; EINTR retries the wait.
pub fn wait(pid: Pid) -> Result<ExitState, DispatchError> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                let state = ExitState::from(status);
                debug!(pid = %pid, ?state, "child finished");
                return Ok(state);
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                debug!(pid = %pid, "child already reaped");
                return Ok(ExitState::Unknown);
            }
            Err(source) => return Err(DispatchError::Wait { pid, source }),
        }
    }
}
