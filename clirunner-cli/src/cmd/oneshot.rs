use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clirunner::{OneshotResult, Options, run_oneshot_with};
use serde::Serialize;
use tracing::info;

use crate::error::CliResult;

#[derive(Args, Debug)]
pub struct OneshotArgs {
    /// Kill the program after this many milliseconds (negative waits forever)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    timeout_ms: i64,
    /// File whose contents are written to the program's stdin
    #[arg(long, short)]
    input: Option<PathBuf>,
    /// Print a JSON report instead of the raw output
    #[arg(long)]
    json: bool,
    /// Program followed by its arguments
    #[arg(last = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Report {
    exit_code: i32,
    status: String,
    stdout: String,
    stderr: String,
}

impl From<&OneshotResult> for Report {
    fn from(result: &OneshotResult) -> Self {
        Self {
            exit_code: result.exit_code(),
            status: result.status.to_string(),
            stdout: result.stdout.to_string_lossy().into_owned(),
            stderr: result.stderr.to_string_lossy().into_owned(),
        }
    }
}

/// Run the program to completion and replay or report its output.
pub fn run_oneshot(options: &Options, args: OneshotArgs) -> CliResult<ExitCode> {
    let input = args.input.as_deref().map(std::fs::read).transpose()?;
    let program = args.command.first().map(String::as_str).unwrap_or_default();

    let result = run_oneshot_with(
        options,
        program,
        &args.command,
        input.as_deref(),
        args.timeout_ms,
    )?;
    info!(program, status = %result.status, "program finished");

    if args.json {
        let report = Report::from(&result);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        std::io::stdout().lock().write_all(result.stdout.as_bytes())?;
        std::io::stderr().lock().write_all(result.stderr.as_bytes())?;
    }
    Ok(super::exit_code(result.exit_code()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &[&str]) -> OneshotArgs {
        OneshotArgs {
            timeout_ms: 5_000,
            input: None,
            json: false,
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn exit_code_follows_child() {
        let code = run_oneshot(&Options::default(), args(&["sh", "-c", "exit 4"])).unwrap();
        assert_eq!(code, ExitCode::from(4));
    }

    #[test]
    fn input_file_is_fed_to_stdin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"exit 9\n").unwrap();

        let mut a = args(&["sh"]);
        a.input = Some(file.path().to_path_buf());
        let code = run_oneshot(&Options::default(), a).unwrap();
        assert_eq!(code, ExitCode::from(9));
    }

    #[test]
    fn report_carries_status_and_output() {
        let result =
            clirunner::run_oneshot("sh", &["sh", "-c", "printf hi; printf err >&2"], None, 5_000)
                .unwrap();
        let report = Report::from(&result);
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.status, "exit code 0");
        assert_eq!(report.stdout, "hi");
        assert_eq!(report.stderr, "err");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stdout"], "hi");
    }

    #[test]
    fn timeout_is_an_error() {
        let mut a = args(&["sleep", "30"]);
        a.timeout_ms = 100;
        let err = run_oneshot(&Options::default(), a).unwrap_err();
        assert!(err.to_string().contains("timed out"), "got {err}");
    }
}
