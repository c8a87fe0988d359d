use std::io::{ErrorKind, Read, Write};
use std::process::ExitCode;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use clap::Args;
use clirunner::{Callbacks, ExitStatus, Options, Session};
use tracing::{debug, info, warn};

use crate::error::CliResult;

const STDIN_CHUNK: usize = 8192;

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Stop the program after this many milliseconds
    #[arg(long)]
    stop_after_ms: Option<u64>,
    /// Signal used by --stop-after-ms; "none" detaches and leaves it running
    #[arg(long, default_value = "SIGTERM")]
    signal: String,
    /// Close the program's stdin right away instead of forwarding ours
    #[arg(long)]
    no_stdin: bool,
    /// Program followed by its arguments
    #[arg(last = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

/// Stream the program's output live, forwarding our stdin to it.
pub fn run_session(options: &Options, args: SessionArgs) -> CliResult<ExitCode> {
    let signal = match args.signal.as_str() {
        "none" | "0" => None,
        name => Some(super::parse_signal(name)?),
    };

    let (tx, rx) = mpsc::channel();
    let callbacks = Callbacks::new()
        .on_stdout(|chunk| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(chunk).and_then(|()| out.flush());
        })
        .on_stderr(|chunk| {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(chunk);
        })
        .on_exit(move |status| {
            let _ = tx.send(status);
        });

    let session = Arc::new(Session::with_options(options.clone()));
    let program = args.command.first().map(String::as_str).unwrap_or_default();
    session.start(program, &args.command, callbacks)?;
    info!(pid = ?session.pid(), program, "session running");

    if args.no_stdin {
        session.close_stdin();
    } else {
        forward_stdin(Arc::clone(&session))?;
    }

    let mut status = None;
    if let Some(ms) = args.stop_after_ms {
        match rx.recv_timeout(Duration::from_millis(ms)) {
            Ok(early) => status = Some(early),
            Err(_) => {
                info!(?signal, "stop deadline reached");
                session.stop(signal)?;
            }
        }
    }
    session.join()?;

    let status = status
        .or_else(|| rx.try_recv().ok())
        .unwrap_or(ExitStatus::Unknown);
    info!(%status, "session finished");
    Ok(super::exit_code(status.code()))
}

/// Copy our stdin to the child on a helper thread, closing the child's stdin
/// at end of input. The thread is not joined: it may stay blocked reading a
/// terminal after the child is gone.
fn forward_stdin(session: Arc<Session>) -> CliResult<()> {
    thread::Builder::new()
        .name("clirun-stdin".into())
        .spawn(move || {
            let mut buf = [0u8; STDIN_CHUNK];
            let mut input = std::io::stdin().lock();
            loop {
                match input.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = session.write_stdin(buf.get(..n).unwrap_or_default()) {
                            debug!(error = %e, "stdin forwarding stopped");
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!(error = %e, "reading stdin failed");
                        break;
                    }
                }
            }
            session.close_stdin();
        })?;
    Ok(())
}
