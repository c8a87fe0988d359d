//! Run `echo` to completion and print what it produced.
//!
//! ```text
//! cargo run -p clirunner --example oneshot_echo
//! ```

use std::process::ExitCode;

use clirunner::run_oneshot;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match run_oneshot("echo", &["echo", "Hello, world"], None, -1) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("exit code: {}", result.exit_code());
    println!("stdout: {}", result.stdout.to_string_lossy());
    println!("stderr: {}", result.stderr.to_string_lossy());
    ExitCode::SUCCESS
}
