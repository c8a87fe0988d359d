//! Process-wide signal disposition.

use std::sync::Once;

use tracing::debug;

static SIGPIPE_IGNORED: Once = Once::new();

/// Ignore `SIGPIPE` for the whole process, once.
///
/// Writing to a child whose stdin is already closed then fails with
/// `EPIPE` instead of killing the caller. [`crate::run_oneshot`] and
/// [`crate::Session::start`] call this automatically; applications may call
/// it during their own initialization to make the side effect explicit.
/// Spawned children get the default disposition back before exec.
pub fn ignore_sigpipe() {
    SIGPIPE_IGNORED.call_once(|| {
        set_disposition(libc::SIGPIPE, libc::SIG_IGN);
        debug!("SIGPIPE disposition set to ignore");
    });
}

/// Install `handler` for `sig` via `sigaction`.
///
/// Async-signal-safe: also used in the forked child before exec.
pub(crate) fn set_disposition(sig: libc::c_int, handler: libc::sighandler_t) {
    // SAFETY: zeroed sigaction is valid (empty mask, no flags); we fill sa_sigaction.
    let mut sa: libc::sigaction = unsafe { std::mem::zeroed() };
    sa.sa_sigaction = handler;
    // SAFETY: sa is properly initialized, sig is a valid signal number.
    unsafe {
        libc::sigaction(sig, &sa, std::ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_disposition(sig: libc::c_int) -> libc::sighandler_t {
        // SAFETY: zeroed sigaction is a valid out-parameter.
        let mut old: libc::sigaction = unsafe { std::mem::zeroed() };
        // SAFETY: null new action only queries the current disposition.
        unsafe {
            libc::sigaction(sig, std::ptr::null(), &mut old);
        }
        old.sa_sigaction
    }

    #[test]
    fn ignore_sigpipe_is_idempotent() {
        ignore_sigpipe();
        ignore_sigpipe();
        assert_eq!(current_disposition(libc::SIGPIPE), libc::SIG_IGN);
    }
}
