//! Run external programs with their standard streams on pipes.
//!
//! Two modes share one exit-code convention (see [`ExitStatus::code`]):
//!
//! - [`run_oneshot`] feeds optional input, captures stdout and stderr into
//!   [`OutputBuffer`]s and returns once the child is reaped, escalating from
//!   SIGTERM to SIGKILL when a timeout expires.
//! - [`Session`] keeps the child running under a background monitor thread
//!   that streams output to a [`SessionHandler`] while the caller writes to
//!   stdin and eventually stops and joins it.
//!
//! The library logs through `tracing` and never installs a subscriber.

mod buffer;
mod clock;
mod config;
mod error;
mod multiplex;
mod oneshot;
mod session;
mod signals;
mod spawn;
mod status;

pub use buffer::{MIN_CAPACITY, OutputBuffer};
pub use config::{
    DEFAULT_GRACE_PERIOD_MS, DEFAULT_INITIAL_BUFFER_CAPACITY, DEFAULT_READ_CHUNK_SIZE,
    DEFAULT_WRITE_RETRY_MS, Options,
};
pub use error::{Error, Result};
pub use nix::sys::signal::Signal;
pub use oneshot::{OneshotResult, run_oneshot, run_oneshot_with};
pub use session::{Callbacks, Session, SessionHandler, SessionState};
pub use signals::ignore_sigpipe;
pub use status::{EXIT_CODE_EXEC_FAILED, EXIT_CODE_UNKNOWN, ExitStatus};
