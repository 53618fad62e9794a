//! Lifecycle hooks and per-command orchestration.

use std::io::Write;
use std::os::fd::AsRawFd;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::DispatchError;
use crate::reaper::Reaper;
use crate::shape::{self, Plan};
use crate::signals::{self, ChildSignals, Saved};
use crate::spawn::{self, cstring, ExitState, Os, Prepared, SystemOs};
use crate::wiring::{Pipe, Wiring};

/// Result of one successful dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Foreground(ExitState),
    Pipeline { left: ExitState, right: ExitState },
    Background(Pid),
}

impl Outcome {
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Foreground(state) => state.code(),
            Outcome::Pipeline { right, .. } => right.code(),
            Outcome::Background(_) => 0,
        }
    }
}

#[derive(Debug)]
enum Lifecycle {
    Idle,
    Ready(Saved),
    Closed,
}

/// Reaped background results held for [`Dispatcher::sweep`]; older ones are
/// dropped once a caller stops sweeping.
pub const FINISHED_BACKLOG: usize = 256;

pub struct Dispatcher<O: Os = SystemOs> {
    os: O,
    config: Config,
    state: Lifecycle,
    reaper: Reaper,
    finished: Vec<(Pid, ExitState)>,
}

impl Dispatcher<SystemOs> {
    pub fn new(config: Config) -> Self {
        Self::with_os(config, SystemOs)
    }
}

impl<O: Os> Dispatcher<O> {
    pub fn with_os(config: Config, os: O) -> Self {
        Dispatcher { os, config, state: Lifecycle::Idle, reaper: Reaper::new(), finished: Vec::new() }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Background jobs that have not been reaped yet.
    pub fn background_jobs(&self) -> &[Pid] {
        self.reaper.pending()
    }

    /// Install the dispatcher's signal policy. Must run once before dispatching.
    pub fn setup(&mut self) -> Result<(), DispatchError> {
        match self.state {
            Lifecycle::Idle => {}
            Lifecycle::Ready(_) => return Err(DispatchError::AlreadySetUp),
            Lifecycle::Closed => return Err(DispatchError::Closed),
        }
        let saved = signals::install(self.config.reap)?;
        self.state = Lifecycle::Ready(saved);
        info!(reap = ?self.config.reap, "dispatcher ready");
        Ok(())
    }

    /// Run one command line, reporting failures on stderr.
    ///
    /// Returns `false` only when the caller should stop feeding commands.
    pub fn dispatch<S: AsRef<str>>(&mut self, argv: &[S]) -> bool {
        if argv.is_empty() && matches!(self.state, Lifecycle::Ready(_)) {
            return true;
        }
        match self.run(argv) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "dispatch failed");
                eprintln!("forksh: {e}");
                !e.is_fatal()
            }
        }
    }

    /// Classify `argv`, spawn its processes and wait on the foreground ones.
    ///
    /// Background jobs that finish meanwhile are reaped and queued for
    /// [`sweep`](Self::sweep), up to [`FINISHED_BACKLOG`] entries.
    pub fn run<S: AsRef<str>>(&mut self, argv: &[S]) -> Result<Outcome, DispatchError> {
        match self.state {
            Lifecycle::Ready(_) => {}
            Lifecycle::Idle => return Err(DispatchError::NotReady),
            Lifecycle::Closed => return Err(DispatchError::Closed),
        }
        self.collect();
        let plan = shape::plan(argv)?;
        debug!(shape = plan.shape_name(), "dispatching");
        let outcome = match plan {
            Plan::Simple { argv } => self.run_foreground(argv, Wiring::Inherit),
            Plan::Redirected { argv, target } => {
                let path = cstring(target)?;
                let wiring = Wiring::RedirectStdout { path: &path, mode: self.config.redirect_mode };
                self.run_foreground(argv, wiring)
            }
            Plan::Background { argv } => self.run_background(argv),
            Plan::Piped { left, right } => self.run_pipeline(left, right),
        };
        self.collect();
        outcome
    }

    fn run_foreground<S: AsRef<str>>(
        &mut self,
        argv: &[S],
        wiring: Wiring<'_>,
    ) -> Result<Outcome, DispatchError> {
        let cmd = Prepared::new(argv)?;
        let pid = spawn::spawn(&self.os, &cmd, ChildSignals::FOREGROUND, wiring)?;
        Ok(Outcome::Foreground(spawn::wait(pid)?))
    }

    fn run_background<S: AsRef<str>>(&mut self, argv: &[S]) -> Result<Outcome, DispatchError> {
        let cmd = Prepared::new(argv)?;
        let pid = spawn::spawn(&self.os, &cmd, ChildSignals::BACKGROUND, Wiring::Inherit)?;
        self.reaper.track(pid);
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{pid}");
        let _ = out.flush();
        Ok(Outcome::Background(pid))
    }

    fn run_pipeline<S: AsRef<str>>(
        &mut self,
        left: &[S],
        right: &[S],
    ) -> Result<Outcome, DispatchError> {
        let left_cmd = Prepared::new(left)?;
        let right_cmd = Prepared::new(right)?;
        let (read, write) = self.os.pipe().map_err(DispatchError::Pipe)?;
        let pipe = Pipe { read, write };
        let (r, w) = (pipe.read.as_raw_fd(), pipe.write.as_raw_fd());

        let left_pid = spawn::spawn(
            &self.os,
            &left_cmd,
            ChildSignals::FOREGROUND,
            Wiring::PipeWriter { read: r, write: w },
        )?;
        let right_pid = match spawn::spawn(
            &self.os,
            &right_cmd,
            ChildSignals::FOREGROUND,
            Wiring::PipeReader { read: r, write: w },
        ) {
            Ok(pid) => pid,
            Err(e) => {
                drop(pipe);
                abandon(left_pid);
                return Err(e);
            }
        };
        drop(pipe);

        let left = spawn::wait(left_pid);
        let right = spawn::wait(right_pid);
        Ok(Outcome::Pipeline { left: left?, right: right? })
    }

    fn collect(&mut self) {
        let done = self.reaper.sweep();
        remember(&mut self.finished, done, FINISHED_BACKLOG);
    }

    /// Reclaim finished background jobs without blocking, returning every job
    /// reaped since the previous call.
    pub fn sweep(&mut self) -> Vec<(Pid, ExitState)> {
        self.collect();
        std::mem::take(&mut self.finished)
    }

    /// Final sweep and restore of the saved signal dispositions. Idempotent.
    pub fn teardown(&mut self) -> Result<(), DispatchError> {
        let state = std::mem::replace(&mut self.state, Lifecycle::Closed);
        self.collect();
        if !self.reaper.pending().is_empty() {
            info!(jobs = ?self.reaper.pending(), "leaving background jobs running");
        }
        if let Lifecycle::Ready(saved) = state {
            signals::restore(saved)?;
            info!("dispatcher closed");
        }
        Ok(())
    }
}

fn remember(finished: &mut Vec<(Pid, ExitState)>, done: Vec<(Pid, ExitState)>, cap: usize) {
    finished.extend(done);
    if finished.len() > cap {
        let dropped = finished.len() - cap;
        debug!(dropped, "discarding unswept background results");
        finished.drain(..dropped);
    }
}

/// Kill and reap a child whose pipeline partner could not be started.
fn abandon(pid: Pid) {
    if let Err(e) = kill(pid, Signal::SIGKILL) {
        debug!(pid = %pid, error = %e, "kill on abandon failed");
    }
    if let Err(e) = spawn::wait(pid) {
        warn!(pid = %pid, error = %e, "failed to reap abandoned child");
    }
}
