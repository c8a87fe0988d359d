//! Synchronous run-to-completion execution with captured output.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::os::fd::AsFd;

use nix::unistd::Pid;
use tracing::{debug, trace, warn};

use crate::buffer::OutputBuffer;
use crate::clock::Deadline;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::multiplex::{self, Interest};
use crate::signals;
use crate::spawn::{self, ChildProcess, CommandSpec, PipeReader, StreamState};
use crate::status::{self, ExitStatus};

/// Everything a finished one-shot run produced.
#[derive(Debug, Clone)]
pub struct OneshotResult {
    pub status: ExitStatus,
    pub stdout: OutputBuffer,
    pub stderr: OutputBuffer,
}

impl OneshotResult {
    /// Shell-style exit code, see [`ExitStatus::code`].
    pub fn exit_code(&self) -> i32 {
        self.status.code()
    }
}

/// Run `program` to completion with default [`Options`].
///
/// `input`, when given, is written to the child's stdin, which is then
/// closed. A negative `timeout_ms` waits indefinitely.
pub fn run_oneshot<P, S>(
    program: P,
    argv: &[S],
    input: Option<&[u8]>,
    timeout_ms: i64,
) -> Result<OneshotResult>
where
    P: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    run_oneshot_with(&Options::default(), program, argv, input, timeout_ms)
}

/// Run `program` to completion, capturing stdout and stderr.
///
/// On timeout the child gets SIGTERM, then SIGKILL after the grace period,
/// and is reaped before [`Error::Timeout`] is returned. On every error path
/// the child is gone by the time this returns; partial output is dropped.
pub fn run_oneshot_with<P, S>(
    options: &Options,
    program: P,
    argv: &[S],
    input: Option<&[u8]>,
    timeout_ms: i64,
) -> Result<OneshotResult>
where
    P: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    options.validate()?;
    let command = CommandSpec::new(program, argv)?;
    signals::ignore_sigpipe();

    let deadline = Deadline::from_millis(timeout_ms);
    let ChildProcess {
        pid,
        mut stdin,
        mut stdout,
        mut stderr,
    } = spawn::spawn(&command)?;
    let guard = KillOnDrop::new(pid);

    let payload = input.unwrap_or_default();
    let mut written = 0;
    if payload.is_empty() {
        stdin = None;
    }

    let mut out = OutputBuffer::with_min_capacity(options.initial_buffer_capacity);
    let mut err = OutputBuffer::with_min_capacity(options.initial_buffer_capacity);
    let mut chunk = vec![0u8; options.read_chunk_size];

    while stdin.is_some() || stdout.is_some() || stderr.is_some() {
        if deadline.expired() {
            return Err(time_out(guard, &deadline, options));
        }

        let tick = stdin.is_some().then(|| options.write_retry());
        let [stdin_ready, stdout_ready, stderr_ready] = multiplex::wait_ready(
            [
                stdin.as_ref().map(|w| (w.as_fd(), Interest::Writable)),
                stdout.as_ref().map(|r| (r.as_fd(), Interest::Readable)),
                stderr.as_ref().map(|r| (r.as_fd(), Interest::Readable)),
            ],
            deadline.poll_millis(tick),
        )?;

        if stdin_ready && let Some(writer) = stdin.as_mut() {
            let rest = payload.get(written..).unwrap_or_default();
            match writer.write_some(rest) {
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!(
                        pid = pid.as_raw(),
                        written,
                        total = payload.len(),
                        "child closed stdin early"
                    );
                    written = payload.len();
                }
                Err(e) => return Err(e.into()),
            }
            if written >= payload.len() {
                trace!(pid = pid.as_raw(), bytes = written, "input delivered, closing stdin");
                stdin = None;
            }
        }
        if stdout_ready {
            drain_into(&mut stdout, &mut chunk, &mut out)?;
        }
        if stderr_ready {
            drain_into(&mut stderr, &mut chunk, &mut err)?;
        }
    }

    // The child may close its output and keep running.
    let Some(status) = status::reap_until(pid, &deadline) else {
        return Err(time_out(guard, &deadline, options));
    };
    guard.disarm();
    Ok(OneshotResult {
        status,
        stdout: out,
        stderr: err,
    })
}

/// Escalate and reap, then build the error for an expired deadline.
fn time_out(guard: KillOnDrop, deadline: &Deadline, options: &Options) -> Error {
    let pid = guard.disarm();
    let timeout = deadline.timeout().unwrap_or_default();
    warn!(pid = pid.as_raw(), ?timeout, "deadline exceeded, terminating child");
    let status = status::terminate(pid, options.grace_period());
    debug!(pid = pid.as_raw(), %status, "timed-out child reaped");
    Error::Timeout {
        pid: pid.as_raw(),
        timeout,
    }
}

/// Drain whatever `stream` has ready into `buf`, closing it at end-of-stream.
fn drain_into(
    stream: &mut Option<PipeReader>,
    chunk: &mut [u8],
    buf: &mut OutputBuffer,
) -> Result<()> {
    if let Some(reader) = stream.as_mut()
        && reader.drain(chunk, |data| buf.append(data).map_err(Error::from))?
            == StreamState::Closed
    {
        *stream = None;
    }
    Ok(())
}

/// Kills and reaps the child unless disarmed, so `?` never leaks a process.
struct KillOnDrop {
    pid: Pid,
    armed: bool,
}

impl KillOnDrop {
    fn new(pid: Pid) -> Self {
        Self { pid, armed: true }
    }

    fn disarm(mut self) -> Pid {
        self.armed = false;
        self.pid
    }
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if self.armed {
            warn!(pid = self.pid.as_raw(), "aborting run, killing child");
            status::kill_and_reap(self.pid);
        }
    }
}
