mod cmd;
mod config;
mod error;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "clirun", version, about = "Run a program over pipes, once or as a live session")]
struct Cli {
    /// Path to a YAML file with engine options
    #[arg(long, short, global = true, env = "CLIRUN_CONFIG")]
    config: Option<PathBuf>,
    #[command(flatten)]
    tuning: config::TuningArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run to completion and print the captured output
    Oneshot(cmd::OneshotArgs),
    /// Stream output live while forwarding stdin
    Session(cmd::SessionArgs),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    clirunner::ignore_sigpipe();

    let cli = Cli::parse();
    let result = config::resolve(cli.config.as_deref(), &cli.tuning).and_then(|options| {
        match cli.command {
            Command::Oneshot(args) => cmd::run_oneshot(&options, args),
            Command::Session(args) => cmd::run_session(&options, args),
        }
    });

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_oneshot_with_trailing_command() {
        let cli = Cli::try_parse_from([
            "clirun",
            "--grace-period-ms",
            "50",
            "oneshot",
            "--timeout-ms",
            "1000",
            "--",
            "echo",
            "-n",
            "hi",
        ])
        .unwrap();
        assert_eq!(cli.tuning.grace_period_ms, Some(50));
        assert!(matches!(cli.command, Command::Oneshot(_)));
    }

    #[test]
    fn session_requires_a_command() {
        assert!(Cli::try_parse_from(["clirun", "session", "--stop-after-ms", "10"]).is_err());
    }
}
