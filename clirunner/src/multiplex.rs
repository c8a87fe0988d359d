//! Readiness wait over a small fixed set of descriptors.

use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, BorrowedFd};

/// What a watched descriptor is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Readable,
    Writable,
}

impl Interest {
    fn events(self) -> libc::c_short {
        match self {
            Self::Readable => libc::POLLIN,
            Self::Writable => libc::POLLOUT,
        }
    }
}

/// Hang-up and error conditions count as ready: the next read returns
/// end-of-stream or the error itself.
const READY_MASK: libc::c_short =
    libc::POLLIN | libc::POLLOUT | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

/// Wait until at least one watched slot is ready or `timeout_ms` passes
/// (`-1` waits indefinitely).
///
/// Empty slots are skipped. Returns per-slot readiness in slot order; a
/// timeout or an interrupted wait yields all `false`, so callers simply
/// loop and re-check their deadline.
pub(crate) fn wait_ready<const N: usize>(
    slots: [Option<(BorrowedFd<'_>, Interest)>; N],
    timeout_ms: i32,
) -> io::Result<[bool; N]> {
    let mut pfds = [libc::pollfd {
        fd: -1,
        events: 0,
        revents: 0,
    }; N];
    for (pfd, slot) in pfds.iter_mut().zip(slots.iter()) {
        if let Some((fd, interest)) = slot {
            pfd.fd = fd.as_raw_fd();
            pfd.events = interest.events();
        }
    }

    // SAFETY: pfds is an initialized array of N pollfd structs; negative fds
    // are ignored by poll(2). The borrowed descriptors outlive this call.
    let rc = unsafe { libc::poll(pfds.as_mut_ptr(), N as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok([false; N]);
        }
        return Err(err);
    }

    let mut ready = [false; N];
    for (flag, pfd) in ready.iter_mut().zip(pfds.iter()) {
        *flag = pfd.fd >= 0 && pfd.revents & READY_MASK != 0;
    }
    Ok(ready)
}
