//! Stream the output of `yes` for a while, then stop it with SIGTERM.
//!
//! ```text
//! cargo run -p clirunner --example session_yes -- 2
//! ```
//!
//! The optional argument is the number of seconds to let it run (default 10).

use std::io::Write;
use std::thread;
use std::time::Duration;

use clirunner::{Callbacks, Session, Signal};
use tracing_subscriber::EnvFilter;

fn main() -> clirunner::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let seconds = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let callbacks = Callbacks::new()
        .on_stdout(|chunk| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(chunk);
            let _ = out.flush();
        })
        .on_exit(|status| eprintln!("\n[process exited with code {}]", status.code()));

    let session = Session::new();
    session.start("yes", &["yes", "Hello, world"], callbacks)?;
    session.close_stdin();

    thread::sleep(Duration::from_secs(seconds));

    session.stop(Some(Signal::SIGTERM))?;
    session.join()?;
    session.destroy()
}
