//! Exit status mapping, reaping and termination.

use std::fmt;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::clock::Deadline;
use crate::error::{Error, Result};

/// Exit code of a child whose exec failed (program missing or not executable).
pub const EXIT_CODE_EXEC_FAILED: i32 = 127;

/// Exit code reported when the status cannot be determined.
pub const EXIT_CODE_UNKNOWN: i32 = -1;

/// Interval between liveness checks while waiting out the grace period.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a child process ended, as observed by its monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal termination with the given exit code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled(Signal),
    /// The session stopped monitoring while the child was still running.
    Detached,
    /// The wait status could not be determined.
    Unknown,
}

impl ExitStatus {
    /// Shell-style code: the exit code, 128 + signal number, or -1.
    pub fn code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(sig) => 128 + *sig as i32,
            Self::Detached | Self::Unknown => EXIT_CODE_UNKNOWN,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn signal(&self) -> Option<Signal> {
        match self {
            Self::Signaled(sig) => Some(*sig),
            _ => None,
        }
    }

    fn from_wait(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::Exited(code)),
            WaitStatus::Signaled(_, sig, _) => Some(Self::Signaled(sig)),
            WaitStatus::StillAlive => None,
            _ => Some(Self::Unknown),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signaled(sig) => write!(f, "killed by {sig:?} (code {})", self.code()),
            Self::Detached => write!(f, "detached"),
            Self::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Block until `pid` terminates and collect its status.
pub(crate) fn reap(pid: Pid) -> ExitStatus {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(status) = ExitStatus::from_wait(status) {
                    debug!(pid = pid.as_raw(), %status, "reaped child");
                    return status;
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(pid = pid.as_raw(), error = %e, "waitpid failed");
                return ExitStatus::Unknown;
            }
        }
    }
}

/// Collect the status of `pid` if it has already terminated.
pub(crate) fn try_reap(pid: Pid) -> Option<ExitStatus> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => return ExitStatus::from_wait(status),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(pid = pid.as_raw(), error = %e, "waitpid failed");
                return Some(ExitStatus::Unknown);
            }
        }
    }
}

/// Reap `pid` if it terminates before `deadline`; `None` once it expires.
///
/// An unbounded deadline is a plain blocking reap.
pub(crate) fn reap_until(pid: Pid, deadline: &Deadline) -> Option<ExitStatus> {
    if deadline.remaining().is_none() {
        return Some(reap(pid));
    }
    loop {
        if let Some(status) = try_reap(pid) {
            return Some(status);
        }
        let left = deadline.remaining().unwrap_or_default();
        if left.is_zero() {
            return None;
        }
        thread::sleep(REAP_POLL_INTERVAL.min(left));
    }
}

/// Deliver `sig` to `pid`. A process that is already gone is not an error.
pub(crate) fn send_signal(pid: Pid, sig: Signal) -> Result<()> {
    match signal::kill(pid, sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(Error::Signal {
            signal: sig,
            pid: pid.as_raw(),
            source,
        }),
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL, and reap.
pub(crate) fn terminate(pid: Pid, grace: Duration) -> ExitStatus {
    debug!(pid = pid.as_raw(), "sending SIGTERM");
    if let Err(e) = send_signal(pid, Signal::SIGTERM) {
        warn!(error = %e, "SIGTERM failed");
    }

    match reap_until(pid, &Deadline::after(grace)) {
        Some(status) => status,
        None => kill_and_reap(pid),
    }
}

/// SIGKILL and reap; used on failure paths where the child must not outlive the call.
pub(crate) fn kill_and_reap(pid: Pid) -> ExitStatus {
    debug!(pid = pid.as_raw(), "sending SIGKILL");
    if let Err(e) = send_signal(pid, Signal::SIGKILL) {
        warn!(error = %e, "SIGKILL failed");
    }
    reap(pid)
}
