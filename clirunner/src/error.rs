use std::collections::TryReserveError;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::Signal;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Pipe creation or fork failed; no child was left behind.
    #[error("spawn failed: {0}")]
    Spawn(#[source] Errno),

    #[error("timed out after {timeout:?} (pid {pid})")]
    Timeout { pid: i32, timeout: Duration },

    #[error("failed to start monitor thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("monitor thread panicked")]
    MonitorPanicked,

    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    #[error("child stdin is closed")]
    StdinClosed,

    #[error("failed to send {signal:?} to pid {pid}: {source}")]
    Signal {
        signal: Signal,
        pid: i32,
        #[source]
        source: Errno,
    },

    #[error("output buffer allocation failed: {0}")]
    OutOfMemory(#[from] TryReserveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
