//! Bookkeeping for background children.
//!
//! Only pids handed to [`Reaper::track`] are ever waited on here, so a sweep
//! cannot steal the status of a foreground child the dispatcher is about to
//! wait for.

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::spawn::ExitState;

#[derive(Debug, Default)]
pub struct Reaper {
    jobs: Vec<Pid>,
}

impl Reaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, pid: Pid) {
        self.jobs.push(pid);
    }

    /// Background children not yet known to have finished.
    pub fn pending(&self) -> &[Pid] {
        &self.jobs
    }

    /// Reclaim every tracked child that has ended, without blocking.
    pub fn sweep(&mut self) -> Vec<(Pid, ExitState)> {
        let mut done = Vec::new();
        self.jobs.retain(|&pid| match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(status) => {
                let state = ExitState::from(status);
                debug!(pid = %pid, ?state, "background job reaped");
                done.push((pid, state));
                false
            }
            Err(Errno::EINTR) => true,
            Err(Errno::ECHILD) => {
                debug!(pid = %pid, "background job reaped elsewhere");
                done.push((pid, ExitState::Unknown));
                false
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "dropping background job");
                false
            }
        });
        done
    }
}
