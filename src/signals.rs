//! Signal dispositions for the dispatcher process and for spawned children.

use nix::sys::signal::{signal, SigHandler, Signal};
use tracing::debug;

use crate::config::ReapMode;
use crate::error::{ChildError, DispatchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
}

impl Disposition {
    fn handler(self) -> SigHandler {
        match self {
            Disposition::Default => SigHandler::SigDfl,
            Disposition::Ignore => SigHandler::SigIgn,
        }
    }
}

/// What a child does with SIGINT and SIGCHLD before it replaces its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSignals {
    pub interrupt: Disposition,
    pub child_exit: Disposition,
}

impl ChildSignals {
    /// `^C` on the terminal kills the job.
    pub const FOREGROUND: ChildSignals = ChildSignals {
        interrupt: Disposition::Default,
        child_exit: Disposition::Default,
    };

    /// `^C` aimed at the foreground leaves the job running.
    pub const BACKGROUND: ChildSignals = ChildSignals {
        interrupt: Disposition::Ignore,
        child_exit: Disposition::Default,
    };

    /// Runs in the forked child only.
    pub(crate) fn apply(&self) -> Result<(), ChildError<'static>> {
        set(Signal::SIGINT, self.interrupt.handler())
            .map_err(|source| ChildError::SignalReset { signal: Signal::SIGINT, source })?;
        set(Signal::SIGCHLD, self.child_exit.handler())
            .map_err(|source| ChildError::SignalReset { signal: Signal::SIGCHLD, source })?;
        Ok(())
    }
}

/// Dispositions that were in place before [`install`], restored by [`restore`].
#[derive(Debug, Clone, Copy)]
pub struct Saved {
    interrupt: SigHandler,
    child_exit: SigHandler,
}

/// Make the dispatcher immune to SIGINT and set SIGCHLD for `mode`.
pub fn install(mode: ReapMode) -> Result<Saved, DispatchError> {
    let child_exit = match mode {
        ReapMode::Poll => SigHandler::SigDfl,
        ReapMode::Kernel => SigHandler::SigIgn,
    };
    let interrupt = set(Signal::SIGINT, SigHandler::SigIgn)
        .map_err(|source| DispatchError::Signal { signal: Signal::SIGINT, source })?;
    let previous_child_exit = match set(Signal::SIGCHLD, child_exit) {
        Ok(h) => h,
        Err(source) => {
            let _ = set(Signal::SIGINT, interrupt);
            return Err(DispatchError::Signal { signal: Signal::SIGCHLD, source });
        }
    };
    debug!(?mode, "signal policy installed");
    Ok(Saved { interrupt, child_exit: previous_child_exit })
}

pub fn restore(saved: Saved) -> Result<(), DispatchError> {
    set(Signal::SIGINT, saved.interrupt)
        .map_err(|source| DispatchError::Signal { signal: Signal::SIGINT, source })?;
    set(Signal::SIGCHLD, saved.child_exit)
        .map_err(|source| DispatchError::Signal { signal: Signal::SIGCHLD, source })?;
    debug!("signal policy restored");
    Ok(())
}

fn set(sig: Signal, handler: SigHandler) -> nix::Result<SigHandler> {
    // SAFETY: only SigDfl/SigIgn or a previously returned handler are installed.
    unsafe { signal(sig, handler) }
}
