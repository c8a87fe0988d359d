//! Monotonic deadlines.

use std::time::{Duration, Instant};

/// Poll timeout meaning "wait indefinitely".
pub(crate) const POLL_FOREVER: i32 = -1;

/// Absolute point in monotonic time, or no limit at all.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Option<Instant>,
    timeout: Option<Duration>,
}

impl Deadline {
    pub(crate) fn unbounded() -> Self {
        Self {
            at: None,
            timeout: None,
        }
    }

    pub(crate) fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            timeout: Some(timeout),
        }
    }

    /// Negative values mean no deadline.
    pub(crate) fn from_millis(timeout_ms: i64) -> Self {
        match u64::try_from(timeout_ms) {
            Ok(ms) => Self::after(Duration::from_millis(ms)),
            Err(_) => Self::unbounded(),
        }
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before the deadline; `None` when unbounded.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Milliseconds to hand to `poll(2)`: the remaining budget, optionally
    /// capped by `tick`, or [`POLL_FOREVER`].
    pub(crate) fn poll_millis(&self, tick: Option<Duration>) -> i32 {
        let wait = match (self.remaining(), tick) {
            (Some(rem), Some(tick)) => Some(rem.min(tick)),
            (rem, tick) => rem.or(tick),
        };
        wait.map_or(POLL_FOREVER, duration_to_poll_millis)
    }
}

/// Round up to whole milliseconds so a sub-millisecond remainder does not
/// turn into a busy zero-timeout poll.
pub(crate) fn duration_to_poll_millis(d: Duration) -> i32 {
    let mut ms = d.as_millis();
    if d.subsec_nanos() % 1_000_000 != 0 {
        ms = ms.saturating_add(1);
    }
    i32::try_from(ms).unwrap_or(i32::MAX)
}
