//! Feed a few lines to `cat`, close its stdin and wait for it to finish.
//!
//! ```text
//! cargo run -p clirunner --example session_cat
//! ```

use clirunner::{ExitStatus, Session, SessionHandler};
use tracing_subscriber::EnvFilter;

struct Printer;

impl SessionHandler for Printer {
    fn on_stdout(&mut self, chunk: &[u8]) {
        print!("[stdout] {}", String::from_utf8_lossy(chunk));
    }

    fn on_stderr(&mut self, chunk: &[u8]) {
        eprint!("[stderr] {}", String::from_utf8_lossy(chunk));
    }

    fn on_exit(&mut self, status: ExitStatus) {
        println!("[exit] {status} (code {})", status.code());
    }
}

fn main() -> clirunner::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let session = Session::new();
    session.start("cat", &["cat"], Printer)?;

    for line in ["1\n", "2\n", "q\n"] {
        session.write_stdin(line.as_bytes())?;
    }
    session.close_stdin();

    session.join()?;
    session.destroy()
}
