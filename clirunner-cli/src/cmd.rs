mod oneshot;
mod session;

use std::process::ExitCode;

use clirunner::Signal;
use tracing::warn;

use crate::error::{CliError, CliResult};

pub use oneshot::{OneshotArgs, run_oneshot};
pub use session::{SessionArgs, run_session};

/// Mirror the child's exit code; codes outside 0-255 become 1.
fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(c) => ExitCode::from(c),
        Err(_) => {
            warn!(exit_code = code, "exit code out of u8 range, using 1");
            ExitCode::FAILURE
        }
    }
}

/// Accepts `SIGTERM`, `TERM`, `term` or a signal number.
fn parse_signal(name: &str) -> CliResult<Signal> {
    if let Ok(num) = name.parse::<i32>() {
        return Signal::try_from(num).map_err(|_| CliError::InvalidSignal(name.to_owned()));
    }
    let upper = name.to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    full.parse()
        .map_err(|_| CliError::InvalidSignal(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_signal_forms() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("term").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("KILL").unwrap(), Signal::SIGKILL);
        assert_eq!(parse_signal("2").unwrap(), Signal::SIGINT);
    }

    #[test]
    fn parse_signal_rejects_unknown() {
        assert!(matches!(
            parse_signal("SIGNOPE"),
            Err(CliError::InvalidSignal(_))
        ));
        assert!(parse_signal("0").is_err());
        assert!(parse_signal("999").is_err());
    }

    #[test]
    fn exit_code_mirrors_child() {
        assert_eq!(exit_code(0), ExitCode::SUCCESS);
        assert_eq!(exit_code(143), ExitCode::from(143));
        assert_eq!(exit_code(-1), ExitCode::FAILURE);
    }
}
