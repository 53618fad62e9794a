use std::borrow::Cow;
use std::ffi::CStr;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

/// Why an argument list could not be turned into a runnable plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("empty command line")]
    Empty,

    #[error("missing command before '{marker}'")]
    MissingCommand { marker: &'static str },

    #[error("malformed pipeline: {reason}")]
    MalformedPipeline { reason: &'static str },
}

/// Parent-side failure of a single dispatch call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to create a child process: {0}")]
    Fork(#[source] Errno),

    #[error("failed to create pipe: {0}")]
    Pipe(#[source] Errno),

    #[error("waiting for child {pid} failed: {source}")]
    Wait {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("argument contains an interior NUL byte: {0:?}")]
    Argument(String),

    #[error(transparent)]
    Plan(#[from] ShapeError),

    #[error("failed to change {signal} handling: {source}")]
    Signal {
        signal: Signal,
        #[source]
        source: Errno,
    },

    #[error("dispatcher used before setup()")]
    NotReady,

    #[error("dispatcher used after teardown()")]
    Closed,

    #[error("setup() called twice")]
    AlreadySetUp,
}

impl DispatchError {
    /// Fatal errors end the command loop; everything else fails one command.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::NotReady | DispatchError::Closed)
    }
}

/// Failure inside a forked child, before or during image replacement.
///
/// These never cross back into the dispatcher: the child prints the error
/// and exits with [`ChildError::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum ChildError<'a> {
    #[error("failed to reset {signal} handling in child: {source}")]
    SignalReset { signal: Signal, source: Errno },

    #[error("{}: {source}", lossy(.path))]
    Redirect { path: &'a CStr, source: Errno },

    #[error("failed to wire {stream}: {source}")]
    Wiring { stream: &'static str, source: Errno },

    #[error("{}: {}", lossy(.program), exec_reason(.source))]
    Exec { program: &'a CStr, source: Errno },
}

fn lossy(s: &CStr) -> Cow<'_, str> {
    s.to_string_lossy()
}

fn exec_reason(errno: &Errno) -> &'static str {
    match *errno {
        Errno::ENOENT => "command not found",
        other => other.desc(),
    }
}

impl ChildError<'_> {
    pub fn exit_code(&self) -> i32 {
        match self {
            ChildError::Exec { source: Errno::ENOENT, .. } => 127,
            ChildError::Exec { .. } => 126,
            _ => 1,
        }
    }
}
