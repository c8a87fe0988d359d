use std::path::Path;

use clap::Args;
use clirunner::Options;

use crate::error::{CliError, CliResult};

/// Tuning flags; each one overrides the matching field of the config file.
#[derive(Args, Debug, Default)]
pub struct TuningArgs {
    /// Milliseconds between SIGTERM and SIGKILL on timeout
    #[arg(long, global = true, env = "CLIRUN_GRACE_PERIOD_MS")]
    pub grace_period_ms: Option<u64>,
    /// Bytes per read from the child's output pipes
    #[arg(long, global = true, env = "CLIRUN_READ_CHUNK_SIZE")]
    pub read_chunk_size: Option<usize>,
    /// Periodic wake-up of the session monitor, in milliseconds
    #[arg(long, global = true, env = "CLIRUN_LIVENESS_TICK_MS")]
    pub liveness_tick_ms: Option<u64>,
}

/// Load [`Options`] from a YAML file. Missing fields take their defaults.
pub fn load(path: &Path) -> CliResult<Options> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CliError::Config(format!("read {}: {e}", path.display())))?;
    if content.trim().is_empty() {
        return Ok(Options::default());
    }
    serde_yaml_ng::from_str(&content)
        .map_err(|e| CliError::Config(format!("parse {}: {e}", path.display())))
}

/// Config file (if any), then flag overrides, then validation.
pub fn resolve(path: Option<&Path>, tuning: &TuningArgs) -> CliResult<Options> {
    let mut options = match path {
        Some(path) => load(path)?,
        None => Options::default(),
    };
    if let Some(ms) = tuning.grace_period_ms {
        options.grace_period_ms = ms;
    }
    if let Some(size) = tuning.read_chunk_size {
        options.read_chunk_size = size;
    }
    if let Some(ms) = tuning.liveness_tick_ms {
        options.liveness_tick_ms = Some(ms);
    }
    options
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, yaml: &str) -> std::path::PathBuf {
        let path = dir.path().join("clirun.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn load_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
grace_period_ms: 750
liveness_tick_ms: 2000
"#,
        );

        let options = load(&path).unwrap();
        assert_eq!(options.grace_period_ms, 750);
        assert_eq!(options.liveness_tick_ms, Some(2000));
        assert_eq!(options.read_chunk_size, clirunner::DEFAULT_READ_CHUNK_SIZE);
        assert_eq!(options.write_retry_ms, clirunner::DEFAULT_WRITE_RETRY_MS);
    }

    #[test]
    fn empty_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "\n");
        assert_eq!(load(&path).unwrap(), Options::default());
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, CliError::Config(_)), "got {err}");
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "grace_period_ms: [not, a, number]\n");
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("parse"), "got {err}");
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "grace_period_ms: 750\nread_chunk_size: 1024\n");
        let tuning = TuningArgs {
            grace_period_ms: Some(50),
            ..Default::default()
        };

        let options = resolve(Some(&path), &tuning).unwrap();
        assert_eq!(options.grace_period_ms, 50);
        assert_eq!(options.read_chunk_size, 1024);
    }

    #[test]
    fn resolve_rejects_invalid_values() {
        let tuning = TuningArgs {
            read_chunk_size: Some(0),
            ..Default::default()
        };
        let err = resolve(None, &tuning).unwrap_err();
        assert!(matches!(err, CliError::Config(_)), "got {err}");
    }
}
