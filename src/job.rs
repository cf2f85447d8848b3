//! Registry of background processes.
//!
//! Entries are polled once per prompt with a non-blocking `waitpid`. The
//! asynchronous side only drains zombies ([`JobRegistry::reap_children`]); a
//! status collected that way for a tracked pid is parked in its entry so the
//! next [`JobRegistry::poll`] still reports it.

use std::fmt;

use libc::{c_int, pid_t};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::execution::Termination;
use crate::sig::errno;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BackgroundJob {
    pid: pid_t,
    finished: Option<Termination>,
}

/// One line of the per-prompt job report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobReport {
    Running(pid_t),
    Done(pid_t, Termination),
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobReport::Running(pid) => write!(f, "background pid is {}", pid),
            JobReport::Done(pid, Termination::Exited(code)) => {
                write!(f, "background pid {} is done: exit value {}", pid, code)
            }
            JobReport::Done(pid, Termination::Signaled(signum)) => write!(
                f,
                "background pid {} is done: terminates by signal {}",
                pid, signum
            ),
        }
    }
}

#[derive(Debug, PartialEq, Error)]
pub enum JobError {
    #[error("too many background processes (limit is {limit})")]
    Full { limit: usize },
}

/// Background processes in spawn order, at most `limit` of them.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Vec<BackgroundJob>,
    limit: usize,
}

impl JobRegistry {
    pub fn new(limit: usize) -> Self {
        JobRegistry {
            jobs: Vec::new(),
            limit,
        }
    }

    /// Fails when another background process could not be tracked.
    pub fn ensure_room(&self) -> Result<(), JobError> {
        if self.jobs.len() >= self.limit {
            return Err(JobError::Full { limit: self.limit });
        }
        Ok(())
    }

    pub fn insert(&mut self, pid: pid_t) -> Result<(), JobError> {
        self.ensure_room()?;
        debug!(pid, "tracking background process");
        self.jobs.push(BackgroundJob {
            pid,
            finished: None,
        });
        Ok(())
    }

    pub fn contains(&self, pid: pid_t) -> bool {
        self.jobs.iter().any(|job| job.pid == pid)
    }

    pub fn pids(&self) -> impl Iterator<Item = pid_t> + '_ {
        self.jobs.iter().map(|job| job.pid)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Records the status of a tracked process reaped elsewhere.
    ///
    /// Returns `false` when `pid` is not tracked.
    pub fn mark(&mut self, pid: pid_t, termination: Termination) -> bool {
        match self.jobs.iter_mut().find(|job| job.pid == pid) {
            Some(job) => {
                job.finished = Some(termination);
                true
            }
            None => false,
        }
    }

    /// Checks every tracked process without blocking.
    ///
    /// Finished processes are reported once and dropped; the others keep
    /// their relative order.
    pub fn poll(&mut self) -> Vec<JobReport> {
        let mut reports = Vec::with_capacity(self.jobs.len());

        self.jobs.retain_mut(|job| {
            if job.finished.is_none() {
                match try_wait(job.pid) {
                    Ok(finished) => job.finished = finished,
                    Err(e) => {
                        warn!(pid = job.pid, errno = e, "lost track of background process");
                        return false;
                    }
                }
            }

            match job.finished {
                Some(termination) => {
                    debug!(pid = job.pid, %termination, "background process finished");
                    reports.push(JobReport::Done(job.pid, termination));
                    false
                }
                None => {
                    reports.push(JobReport::Running(job.pid));
                    true
                }
            }
        });

        reports
    }

    /// Collects every terminated child without blocking.
    ///
    /// Must not run while a foreground child is being waited for, it would
    /// steal that child's status.
    pub fn reap_children(&mut self) -> usize {
        let mut reaped = 0;

        loop {
            let mut status: c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };

            if pid == -1 && errno() == libc::EINTR {
                continue;
            }
            if pid <= 0 {
                break;
            }

            reaped += 1;
            if !self.mark(pid, Termination::from_raw(status)) {
                trace!(pid, "reaped untracked child");
            }
        }

        reaped
    }

    /// Sends SIGTERM to every process that has not finished yet.
    pub fn terminate_all(&mut self) {
        for job in self.jobs.iter().filter(|job| job.finished.is_none()) {
            debug!(pid = job.pid, "terminating background process");
            unsafe { libc::kill(job.pid, libc::SIGTERM) };
        }
    }
}

fn try_wait(pid: pid_t) -> Result<Option<Termination>, c_int> {
    let mut status: c_int = 0;

    loop {
        match unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) } {
            0 => return Ok(None),
            -1 => match errno() {
                libc::EINTR => continue,
                e => return Err(e),
            },
            _ => return Ok(Some(Termination::from_raw(status))),
        }
    }
}
