//! Fork/exec with the child's standard streams wired to pipes.

use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;

use nix::fcntl::OFlag;
use nix::unistd::{ForkResult, Pid, fork, pipe2};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::signals;
use crate::status::{self, EXIT_CODE_EXEC_FAILED};

/// Upper bound on reads per readiness event, so one chatty stream cannot
/// starve the other descriptors in the wait set.
const MAX_READS_PER_WAKE: usize = 64;

/// Program plus argument vector, converted to C strings up front so nothing
/// allocates between fork and exec.
#[derive(Debug, Clone)]
pub(crate) struct CommandSpec {
    program: CString,
    argv: Vec<CString>,
}

impl CommandSpec {
    /// `argv` is the full argument vector; by convention `argv[0]` is the
    /// program name. The program is looked up via `PATH` when it has no slash.
    pub(crate) fn new<P, S>(program: P, argv: &[S]) -> Result<Self>
    where
        P: AsRef<OsStr>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        if program.is_empty() {
            return Err(Error::InvalidArgument("empty program name".into()));
        }
        if argv.is_empty() {
            return Err(Error::InvalidArgument("empty argument vector".into()));
        }

        let program = to_cstring(program)?;
        let argv = argv
            .iter()
            .map(|arg| to_cstring(arg.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { program, argv })
    }

    /// Human-readable command line for logs.
    pub(crate) fn display(&self) -> String {
        self.argv
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn to_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| {
        Error::InvalidArgument(format!("argument contains NUL byte: {}", s.to_string_lossy()))
    })
}

/// Whether a stream can still produce data after a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    Open,
    Closed,
}

/// Parent-side read end of a pipe, non-blocking.
#[derive(Debug)]
pub(crate) struct PipeReader(File);

impl PipeReader {
    /// Read everything currently available, passing each chunk to `sink`.
    ///
    /// Stops at would-block (still open) or end-of-stream (closed).
    pub(crate) fn drain(
        &mut self,
        chunk: &mut [u8],
        mut sink: impl FnMut(&[u8]) -> Result<()>,
    ) -> Result<StreamState> {
        let mut reads = 0;
        while reads < MAX_READS_PER_WAKE {
            match self.0.read(chunk) {
                Ok(0) => return Ok(StreamState::Closed),
                Ok(n) => {
                    reads += 1;
                    sink(chunk.get(..n).unwrap_or_default())?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(StreamState::Open),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(StreamState::Open)
    }
}

impl AsFd for PipeReader {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// Parent-side write end of a pipe, non-blocking.
#[derive(Debug)]
pub(crate) struct PipeWriter(File);

impl PipeWriter {
    /// Write as much of `bytes` as fits without blocking; 0 when the pipe
    /// is full.
    pub(crate) fn write_some(&self, bytes: &[u8]) -> io::Result<usize> {
        loop {
            match (&self.0).write(bytes) {
                Ok(0) if !bytes.is_empty() => return Err(ErrorKind::WriteZero.into()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                other => return other,
            }
        }
    }
}

impl AsFd for PipeWriter {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// Non-blocking, close-on-exec pipe for in-process signalling.
pub(crate) fn pipe_pair() -> Result<(PipeReader, PipeWriter)> {
    let (read, write) = cloexec_pipe()?;
    set_nonblocking(read.as_fd())?;
    set_nonblocking(write.as_fd())?;
    Ok((PipeReader(read.into()), PipeWriter(write.into())))
}

/// A spawned child and the parent's ends of its three pipes.
///
/// Each stream is dropped (closed) independently; `None` means closed.
#[derive(Debug)]
pub(crate) struct ChildProcess {
    pub(crate) pid: Pid,
    pub(crate) stdin: Option<PipeWriter>,
    pub(crate) stdout: Option<PipeReader>,
    pub(crate) stderr: Option<PipeReader>,
}

/// Child-side descriptors, captured as raw numbers before the fork.
struct ChildFds {
    stdin: RawFd,
    stdout: RawFd,
    stderr: RawFd,
    /// Every pipe end, closed after redirection.
    all: [RawFd; 6],
}

/// Spawn `command` with stdin/stdout/stderr connected to fresh pipes.
///
/// Pipe or fork failure returns [`Error::Spawn`] and leaves no descriptors
/// behind. Exec failure is only visible as exit code 127 from the child.
pub(crate) fn spawn(command: &CommandSpec) -> Result<ChildProcess> {
    let (stdin_r, stdin_w) = cloexec_pipe()?;
    let (stdout_r, stdout_w) = cloexec_pipe()?;
    let (stderr_r, stderr_w) = cloexec_pipe()?;

    let fds = ChildFds {
        stdin: stdin_r.as_raw_fd(),
        stdout: stdout_w.as_raw_fd(),
        stderr: stderr_w.as_raw_fd(),
        all: [
            stdin_r.as_raw_fd(),
            stdin_w.as_raw_fd(),
            stdout_r.as_raw_fd(),
            stdout_w.as_raw_fd(),
            stderr_r.as_raw_fd(),
            stderr_w.as_raw_fd(),
        ],
    };

    let mut argv_ptrs: Vec<*const libc::c_char> =
        command.argv.iter().map(|arg| arg.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    // SAFETY: the child only calls async-signal-safe functions (dup2, close,
    // sigaction, execvp, _exit) on data prepared before the fork.
    match unsafe { fork() }.map_err(Error::Spawn)? {
        ForkResult::Child => exec_child(&fds, command.program.as_ptr(), argv_ptrs.as_ptr()),
        ForkResult::Parent { child } => {
            drop(stdin_r);
            drop(stdout_w);
            drop(stderr_w);

            if let Err(e) = set_nonblocking(stdin_w.as_fd())
                .and_then(|()| set_nonblocking(stdout_r.as_fd()))
                .and_then(|()| set_nonblocking(stderr_r.as_fd()))
            {
                status::kill_and_reap(child);
                return Err(e);
            }

            debug!(pid = child.as_raw(), command = %command.display(), "spawned child");
            Ok(ChildProcess {
                pid: child,
                stdin: Some(PipeWriter(stdin_w.into())),
                stdout: Some(PipeReader(stdout_r.into())),
                stderr: Some(PipeReader(stderr_r.into())),
            })
        }
    }
}

/// Redirect and narrow, then exec. Runs in the forked child only.
fn exec_child(
    fds: &ChildFds,
    program: *const libc::c_char,
    argv: *const *const libc::c_char,
) -> ! {
    // SAFETY: raw descriptors are valid in the child (inherited from the
    // parent); _exit never returns into parent code.
    unsafe {
        if libc::dup2(fds.stdin, libc::STDIN_FILENO) < 0
            || libc::dup2(fds.stdout, libc::STDOUT_FILENO) < 0
            || libc::dup2(fds.stderr, libc::STDERR_FILENO) < 0
        {
            libc::_exit(EXIT_CODE_EXEC_FAILED);
        }
        for fd in fds.all {
            if fd > libc::STDERR_FILENO {
                libc::close(fd);
            }
        }
    }

    signals::set_disposition(libc::SIGPIPE, libc::SIG_DFL);

    // SAFETY: program and argv point at NUL-terminated strings and a
    // null-terminated pointer array owned by the parent's (copied) memory.
    unsafe {
        libc::execvp(program, argv);
        libc::_exit(EXIT_CODE_EXEC_FAILED)
    }
}

fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    pipe2(OFlag::O_CLOEXEC).map_err(Error::Spawn)
}

fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: raw is an open descriptor borrowed for the duration of this call.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error().into());
    }
    // SAFETY: as above; only the O_NONBLOCK status flag is added.
    if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error().into());
    }
    trace!(fd = raw, "descriptor set non-blocking");
    Ok(())
}
