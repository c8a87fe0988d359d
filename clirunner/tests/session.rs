#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use clirunner::{Error, ExitStatus, Session, SessionHandler, SessionState, Signal};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// Collects everything the monitor delivers.
#[derive(Clone, Default)]
struct Recorder {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    exits: Arc<Mutex<Vec<ExitStatus>>>,
}

impl Recorder {
    fn stdout(&self) -> Vec<u8> {
        self.stdout.lock().unwrap().clone()
    }

    fn stderr(&self) -> Vec<u8> {
        self.stderr.lock().unwrap().clone()
    }

    fn exits(&self) -> Vec<ExitStatus> {
        self.exits.lock().unwrap().clone()
    }
}

impl SessionHandler for Recorder {
    fn on_stdout(&mut self, chunk: &[u8]) {
        self.stdout.lock().unwrap().extend_from_slice(chunk);
    }

    fn on_stderr(&mut self, chunk: &[u8]) {
        self.stderr.lock().unwrap().extend_from_slice(chunk);
    }

    fn on_exit(&mut self, status: ExitStatus) {
        self.exits.lock().unwrap().push(status);
    }
}

/// Forwards stdout chunks over a channel so tests can wait for output.
struct Forwarder(mpsc::Sender<Vec<u8>>);

impl SessionHandler for Forwarder {
    fn on_stdout(&mut self, chunk: &[u8]) {
        let _ = self.0.send(chunk.to_vec());
    }
}

fn wait_for_bytes(rx: &Receiver<Vec<u8>>, want: usize) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut got = Vec::new();
    while got.len() < want {
        let left = deadline.saturating_duration_since(Instant::now());
        let chunk = rx.recv_timeout(left).expect("output did not arrive in time");
        got.extend_from_slice(&chunk);
    }
    got
}

#[test]
fn cat_session_echoes_written_lines() {
    let recorder = Recorder::default();
    let session = Session::new();
    session.start("cat", &["cat"], recorder.clone()).unwrap();
    assert_eq!(session.state(), SessionState::Running);

    for line in ["1\n", "2\n", "q\n"] {
        assert_eq!(session.write_stdin(line.as_bytes()).unwrap(), line.len());
    }
    session.close_stdin();
    session.join().unwrap();

    assert_eq!(recorder.stdout(), b"1\n2\nq\n");
    assert!(recorder.stderr().is_empty());
    assert_eq!(recorder.exits(), vec![ExitStatus::Exited(0)]);
    session.destroy().unwrap();
}

#[test]
fn output_arrives_while_session_runs() {
    let (tx, rx) = mpsc::channel();
    let session = Session::new();
    session.start("cat", &["cat"], Forwarder(tx)).unwrap();

    session.write_stdin(b"ping\n").unwrap();
    assert_eq!(wait_for_bytes(&rx, 5), b"ping\n");
    session.write_stdin(b"pong\n").unwrap();
    assert_eq!(wait_for_bytes(&rx, 5), b"pong\n");

    session.close_stdin();
    session.join().unwrap();
}

#[test]
fn closing_stdin_keeps_capturing_until_exit() {
    let recorder = Recorder::default();
    let session = Session::new();
    session
        .start("sh", &["sh", "-c", "cat; echo done; echo bye >&2"], recorder.clone())
        .unwrap();

    session.write_stdin(b"payload\n").unwrap();
    session.close_stdin();
    assert_eq!(session.state(), SessionState::Running);
    session.join().unwrap();

    assert_eq!(recorder.stdout(), b"payload\ndone\n");
    assert_eq!(recorder.stderr(), b"bye\n");
    assert_eq!(recorder.exits(), vec![ExitStatus::Exited(0)]);
}

#[test]
fn stop_with_sigterm_reports_143() {
    let (tx, rx) = mpsc::channel();
    let exits = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&exits);
    let callbacks = clirunner::Callbacks::new()
        .on_stdout(move |chunk| {
            let _ = tx.send(chunk.to_vec());
        })
        .on_exit(move |status| seen.lock().unwrap().push(status));

    let session = Session::new();
    session.start("yes", &["yes"], callbacks).unwrap();
    // Make sure the stream is flowing before stopping it.
    let first = wait_for_bytes(&rx, 2);
    assert!(first.starts_with(b"y\n"));

    session.stop(Some(Signal::SIGTERM)).unwrap();
    session.join().unwrap();

    let exits = exits.lock().unwrap().clone();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].code(), 128 + 15);
}

#[test]
fn stop_without_signal_detaches_from_live_child() {
    let recorder = Recorder::default();
    let session = Session::new();
    session.start("sleep", &["sleep", "30"], recorder.clone()).unwrap();
    let pid = Pid::from_raw(session.pid().unwrap());

    session.stop(None).unwrap();
    session.join().unwrap();

    assert_eq!(recorder.exits(), vec![ExitStatus::Detached]);
    assert_eq!(kill(pid, None), Ok(()), "child should still be running");

    kill(pid, Signal::SIGKILL).unwrap();
    waitpid(pid, None).unwrap();
    assert_eq!(kill(pid, None), Err(Errno::ESRCH));
}

#[test]
fn on_exit_fires_once_after_natural_exit_and_late_stop() {
    let recorder = Recorder::default();
    let session = Session::new();
    session.start("sh", &["sh", "-c", "exit 7"], recorder.clone()).unwrap();
    session.join().unwrap();

    session.stop(Some(Signal::SIGTERM)).unwrap();
    assert_eq!(recorder.exits(), vec![ExitStatus::Exited(7)]);
}

#[test]
fn session_is_shareable_across_threads() {
    let recorder = Recorder::default();
    let session = Arc::new(Session::new());
    session.start("cat", &["cat"], recorder.clone()).unwrap();

    let writer = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            for i in 0..100 {
                session.write_stdin(format!("{i}\n").as_bytes()).unwrap();
            }
            session.close_stdin();
        })
    };
    writer.join().unwrap();
    session.join().unwrap();

    let expected: String = (0..100).map(|i| format!("{i}\n")).collect();
    assert_eq!(recorder.stdout(), expected.into_bytes());
    assert_eq!(recorder.exits(), vec![ExitStatus::Exited(0)]);
}

#[test]
fn detached_child_keeps_writing() {
    let (tx, rx) = mpsc::channel();
    let session = Session::new();
    session.start("yes", &["yes"], Forwarder(tx)).unwrap();
    wait_for_bytes(&rx, 2);
    let pid = Pid::from_raw(session.pid().unwrap());

    session.stop(None).unwrap();
    session.join().unwrap();
    // Long enough for `yes` to fill the pipe and block on it.
    thread::sleep(Duration::from_millis(300));
    assert_eq!(
        waitpid(pid, Some(WaitPidFlag::WNOHANG)),
        Ok(WaitStatus::StillAlive),
        "detached child should still be running"
    );

    kill(pid, Signal::SIGKILL).unwrap();
    assert_eq!(waitpid(pid, None), Ok(WaitStatus::Signaled(pid, Signal::SIGKILL, false)));
    drop(session);
}

#[test]
fn close_stdin_interrupts_blocked_write() {
    let session = Arc::new(Session::new());
    session.start("sleep", &["sleep", "30"], Recorder::default()).unwrap();

    let writer = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            // `sleep` never reads, so this fills the pipe and waits.
            let result = session.write_stdin(&vec![b'x'; 1 << 20]);
            (result, Instant::now())
        })
    };
    thread::sleep(Duration::from_millis(200));

    let start = Instant::now();
    session.close_stdin();
    assert!(start.elapsed() < Duration::from_millis(500), "close_stdin took {:?}", start.elapsed());

    let (result, finished) = writer.join().unwrap();
    assert!(matches!(result, Err(Error::StdinClosed)), "got {result:?}");
    assert!(finished.duration_since(start) < Duration::from_secs(2));

    session.stop(Some(Signal::SIGKILL)).unwrap();
    session.join().unwrap();
}
