//! Interactive sessions: a child process watched by a background thread.
//!
//! The monitor thread is the only reader of the child's stdout and stderr and
//! the only place the exit status is collected. The controlling side writes
//! to stdin, closes it, and stops the session from any thread; a one-byte
//! message on an internal pipe wakes the monitor out of its wait.

use std::ffi::OsStr;
use std::fmt;
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::{debug, info, trace, warn};

use crate::clock::{Deadline, duration_to_poll_millis};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::multiplex::{self, Interest};
use crate::signals;
use crate::spawn::{self, ChildProcess, CommandSpec, PipeReader, PipeWriter, StreamState};
use crate::status::{self, ExitStatus};

/// Byte written to the control pipe to wake the monitor.
const WAKE_BYTE: &[u8] = b"X";

/// Receives session events on the monitor thread.
///
/// Every method defaults to ignoring the event. Chunks are delivered as soon
/// as they are read, in order per stream; there is no ordering between
/// stdout and stderr. `on_exit` is called exactly once per started session.
pub trait SessionHandler: Send + 'static {
    fn on_stdout(&mut self, _chunk: &[u8]) {}

    fn on_stderr(&mut self, _chunk: &[u8]) {}

    fn on_exit(&mut self, _status: ExitStatus) {}
}

type ChunkFn = Box<dyn FnMut(&[u8]) + Send>;
type ExitFn = Box<dyn FnMut(ExitStatus) + Send>;

/// [`SessionHandler`] assembled from closures; unset slots drop the event.
///
/// ```no_run
/// use clirunner::{Callbacks, Session};
///
/// let session = Session::new();
/// let callbacks = Callbacks::new()
///     .on_stdout(|chunk| print!("{}", String::from_utf8_lossy(chunk)))
///     .on_exit(|status| println!("[exit {}]", status.code()));
/// session.start("yes", &["yes"], callbacks)?;
/// # Ok::<(), clirunner::Error>(())
/// ```
#[derive(Default)]
pub struct Callbacks {
    stdout: Option<ChunkFn>,
    stderr: Option<ChunkFn>,
    exit: Option<ExitFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_stdout(mut self, f: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.stdout = Some(Box::new(f));
        self
    }

    pub fn on_stderr(mut self, f: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.stderr = Some(Box::new(f));
        self
    }

    pub fn on_exit(mut self, f: impl FnMut(ExitStatus) + Send + 'static) -> Self {
        self.exit = Some(Box::new(f));
        self
    }
}

impl SessionHandler for Callbacks {
    fn on_stdout(&mut self, chunk: &[u8]) {
        if let Some(f) = self.stdout.as_mut() {
            f(chunk);
        }
    }

    fn on_stderr(&mut self, chunk: &[u8]) {
        if let Some(f) = self.stderr.as_mut() {
            f(chunk);
        }
    }

    fn on_exit(&mut self, status: ExitStatus) {
        if let Some(f) = self.exit.as_mut() {
            f(status);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("exit", &self.exit.is_some())
            .finish()
    }
}

/// Lifecycle of a [`Session`]; transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Stopping,
    Joined,
}

// Stop requests, ordered so that a signalled stop outranks a detach.
const REQUEST_NONE: u8 = 0;
const REQUEST_DETACH: u8 = 1;
const REQUEST_STOP: u8 = 2;

/// State shared between the controller and the monitor thread.
#[derive(Debug, Default)]
struct Shared {
    request: AtomicU8,
    reaped: AtomicBool,
    /// Output pipes of a detached child, held open until the session is
    /// dropped so the child's writes do not raise SIGPIPE.
    parked: Mutex<Vec<PipeReader>>,
}

impl Shared {
    fn request(&self, request: u8) {
        self.request.fetch_max(request, Ordering::AcqRel);
    }

    fn pending(&self) -> u8 {
        self.request.load(Ordering::Acquire)
    }

    fn reaped(&self) -> bool {
        self.reaped.load(Ordering::Acquire)
    }

    fn park(&self, streams: impl IntoIterator<Item = PipeReader>) {
        self.parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(streams);
    }
}

#[derive(Debug)]
struct Active {
    pid: Pid,
    control: PipeWriter,
    shared: Arc<Shared>,
    monitor: Option<JoinHandle<()>>,
}

impl Active {
    /// Wake the monitor. A full pipe already holds a pending wake-up and a
    /// closed one means the monitor is gone, so failures are only traced.
    fn wake(&mut self) {
        if let Err(e) = self.control.write_some(WAKE_BYTE) {
            trace!(pid = self.pid.as_raw(), error = %e, "control wake-up not delivered");
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    active: Option<Active>,
}

/// A child process with streamed output and a writable stdin.
///
/// All methods take `&self`, so a session can be shared across threads
/// (for example behind an `Arc`) while the monitor delivers output.
#[derive(Debug)]
pub struct Session {
    options: Options,
    stdin: Mutex<Option<Arc<PipeWriter>>>,
    inner: Mutex<Inner>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            options,
            stdin: Mutex::new(None),
            inner: Mutex::new(Inner {
                state: SessionState::Created,
                active: None,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock_inner().state
    }

    /// Pid of the child, once started.
    pub fn pid(&self) -> Option<i32> {
        self.lock_inner().active.as_ref().map(|a| a.pid.as_raw())
    }

    /// Spawn `program` and start monitoring it, delivering events to `handler`.
    ///
    /// On failure the session stays [`SessionState::Created`] and any child
    /// spawned along the way has been killed and reaped.
    pub fn start<P, S, H>(&self, program: P, argv: &[S], handler: H) -> Result<()>
    where
        P: AsRef<OsStr>,
        S: AsRef<OsStr>,
        H: SessionHandler,
    {
        let mut inner = self.lock_inner();
        if inner.state != SessionState::Created {
            return Err(Error::InvalidState("session already started"));
        }
        self.options.validate()?;
        let command = CommandSpec::new(program, argv)?;
        signals::ignore_sigpipe();

        let (control_rx, control_tx) = spawn::pipe_pair()?;
        let ChildProcess {
            pid,
            stdin,
            stdout,
            stderr,
        } = spawn::spawn(&command)?;

        let shared = Arc::new(Shared::default());
        let monitor = Monitor {
            pid,
            stdout,
            stderr,
            control: control_rx,
            shared: Arc::clone(&shared),
            chunk: vec![0u8; self.options.read_chunk_size],
            tick: self.options.liveness_tick(),
            grace: self.options.grace_period(),
        };
        let handle = match thread::Builder::new()
            .name(format!("clirunner-{pid}"))
            .spawn(move || monitor.run(handler))
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(pid = pid.as_raw(), error = %e, "monitor thread failed to start");
                status::kill_and_reap(pid);
                return Err(Error::ThreadSpawn(e));
            }
        };

        *self.lock_stdin() = stdin.map(Arc::new);
        inner.active = Some(Active {
            pid,
            control: control_tx,
            shared,
            monitor: Some(handle),
        });
        inner.state = SessionState::Running;
        info!(pid = pid.as_raw(), command = %command.display(), "session started");
        Ok(())
    }

    /// Write all of `bytes` to the child's stdin and return the count.
    ///
    /// While the pipe is full the call waits for space without holding the
    /// stdin lock, so a [`close_stdin`](Self::close_stdin) from another
    /// thread takes effect at the next retry and this call then fails with
    /// [`Error::StdinClosed`]. Concurrent writers may interleave.
    pub fn write_stdin(&self, bytes: &[u8]) -> Result<usize> {
        if self.state() == SessionState::Created {
            return Err(Error::InvalidState("session not started"));
        }
        let retry_ms = duration_to_poll_millis(self.options.write_retry());
        let mut written = 0;
        loop {
            let writer = self
                .lock_stdin()
                .as_ref()
                .map(Arc::clone)
                .ok_or(Error::StdinClosed)?;
            let Some(rest) = bytes.get(written..).filter(|rest| !rest.is_empty()) else {
                break;
            };
            let n = writer.write_some(rest)?;
            written += n;
            if n == 0 {
                multiplex::wait_ready([Some((writer.as_fd(), Interest::Writable))], retry_ms)?;
            }
        }
        trace!(bytes = written, "wrote to child stdin");
        Ok(written)
    }

    /// Close the child's stdin; output keeps flowing. Later calls do nothing.
    ///
    /// A write waiting for pipe space still holds the descriptor until its
    /// next retry.
    pub fn close_stdin(&self) {
        if self.lock_stdin().take().is_some() {
            debug!(pid = ?self.pid(), "closed child stdin");
        }
    }

    /// End monitoring.
    ///
    /// With a signal, the child receives it (unless it was already reaped)
    /// and the monitor waits for it to exit. With `None` the monitor detaches:
    /// the child is left running and `on_exit` reports
    /// [`ExitStatus::Detached`] unless it had already terminated.
    pub fn stop(&self, signal: Option<Signal>) -> Result<()> {
        let mut inner = self.lock_inner();
        let Some(active) = inner.active.as_mut() else {
            return Err(Error::InvalidState("session not started"));
        };

        active.shared.request(if signal.is_some() {
            REQUEST_STOP
        } else {
            REQUEST_DETACH
        });
        let sent = match signal {
            Some(sig) if !active.shared.reaped() => Some(status::send_signal(active.pid, sig)),
            _ => None,
        };
        active.wake();
        debug!(pid = active.pid.as_raw(), ?signal, signalled = sent.is_some(), "session stop requested");

        if inner.state == SessionState::Running {
            inner.state = SessionState::Stopping;
        }
        sent.unwrap_or(Ok(()))
    }

    /// Block until the monitor thread has finished.
    ///
    /// Without a prior [`stop`](Self::stop) this waits for the child to close
    /// its output streams.
    pub fn join(&self) -> Result<()> {
        let handle = {
            let mut inner = self.lock_inner();
            match inner.state {
                SessionState::Created => return Err(Error::InvalidState("session not started")),
                SessionState::Joined => return Err(Error::InvalidState("session already joined")),
                SessionState::Running | SessionState::Stopping => {}
            }
            inner.state = SessionState::Joined;
            inner.active.as_mut().and_then(|a| a.monitor.take())
        };
        let handle = handle.ok_or(Error::InvalidState("monitor already reclaimed"))?;
        handle.join().map_err(|_| Error::MonitorPanicked)
    }

    /// Release the session.
    ///
    /// A session that was started but never joined is a usage error, and so
    /// is one that was stopped without a following [`join`](Self::join): the
    /// monitor is detached (a signalled stop still waits for the child),
    /// reclaimed, and then [`Error::InvalidState`] is returned.
    pub fn destroy(mut self) -> Result<()> {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(active) = inner.active.as_mut() else {
            return Ok(());
        };
        let Some(monitor) = active.monitor.take() else {
            return Ok(());
        };

        warn!(pid = active.pid.as_raw(), "session destroyed before join, detaching monitor");
        active.shared.request(REQUEST_DETACH);
        active.wake();
        inner.state = SessionState::Joined;
        monitor.join().map_err(|_| Error::MonitorPanicked)?;
        Err(Error::InvalidState("session destroyed before join"))
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stdin(&self) -> MutexGuard<'_, Option<Arc<PipeWriter>>> {
        self.stdin.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = inner.active.as_mut()
            && active.monitor.is_some()
        {
            warn!(pid = active.pid.as_raw(), "session dropped before join, detaching monitor");
            active.shared.request(REQUEST_DETACH);
            active.wake();
        }
    }
}

/// Everything the monitor thread owns.
struct Monitor {
    pid: Pid,
    stdout: Option<PipeReader>,
    stderr: Option<PipeReader>,
    control: PipeReader,
    shared: Arc<Shared>,
    chunk: Vec<u8>,
    tick: Option<Duration>,
    grace: Duration,
}

impl Monitor {
    fn run<H: SessionHandler>(mut self, mut handler: H) {
        let pid = self.pid;
        let status = match self.pump(&mut handler) {
            Ok(()) if self.shared.pending() == REQUEST_DETACH => {
                status::try_reap(pid).unwrap_or_else(|| {
                    info!(pid = pid.as_raw(), "monitor detached, child left running");
                    ExitStatus::Detached
                })
            }
            Ok(()) => status::reap(pid),
            Err(e) => {
                warn!(pid = pid.as_raw(), error = %e, "monitor failed, terminating child");
                status::terminate(pid, self.grace)
            }
        };
        if status == ExitStatus::Detached {
            self.shared.park(self.stdout.take().into_iter().chain(self.stderr.take()));
        } else {
            self.shared.reaped.store(true, Ordering::Release);
        }

        info!(pid = pid.as_raw(), %status, "session finished");
        handler.on_exit(status);
    }

    /// Deliver output until a stop is requested or both streams end.
    fn pump<H: SessionHandler>(&mut self, handler: &mut H) -> Result<()> {
        let poll_ms = Deadline::unbounded().poll_millis(self.tick);
        loop {
            if self.shared.pending() != REQUEST_NONE {
                return Ok(());
            }
            if self.stdout.is_none() && self.stderr.is_none() {
                trace!(pid = self.pid.as_raw(), "child output closed");
                return Ok(());
            }

            let [out_ready, err_ready, control_ready] = multiplex::wait_ready(
                [
                    self.stdout.as_ref().map(|r| (r.as_fd(), Interest::Readable)),
                    self.stderr.as_ref().map(|r| (r.as_fd(), Interest::Readable)),
                    Some((self.control.as_fd(), Interest::Readable)),
                ],
                poll_ms,
            )?;

            if control_ready {
                let mut wake = [0u8; 16];
                self.control.drain(&mut wake, |_| Ok(()))?;
                trace!(pid = self.pid.as_raw(), "monitor woken by control channel");
                return Ok(());
            }
            if out_ready {
                deliver(&mut self.stdout, &mut self.chunk, |data| handler.on_stdout(data))?;
            }
            if err_ready {
                deliver(&mut self.stderr, &mut self.chunk, |data| handler.on_stderr(data))?;
            }
        }
    }
}

fn deliver(
    stream: &mut Option<PipeReader>,
    chunk: &mut [u8],
    mut callback: impl FnMut(&[u8]),
) -> Result<()> {
    if let Some(reader) = stream.as_mut()
        && reader.drain(chunk, |data| {
            callback(data);
            Ok(())
        })? == StreamState::Closed
    {
        *stream = None;
    }
    Ok(())
}
