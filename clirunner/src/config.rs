use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::MIN_CAPACITY;
use crate::error::{Error, Result};

pub const DEFAULT_GRACE_PERIOD_MS: u64 = 200;
pub const DEFAULT_WRITE_RETRY_MS: u64 = 50;
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8192;
pub const DEFAULT_INITIAL_BUFFER_CAPACITY: usize = MIN_CAPACITY;

/// Tuning knobs shared by one-shot runs and sessions.
///
/// Deserializable with every field optional, so it can be embedded in an
/// application's own config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Time between SIGTERM and SIGKILL when a one-shot run times out.
    pub grace_period_ms: u64,
    /// Upper bound on each wait for stdin pipe space before retrying a write.
    pub write_retry_ms: u64,
    /// Bytes requested per read; also the largest chunk a callback receives.
    pub read_chunk_size: usize,
    /// First allocation of each capture buffer.
    pub initial_buffer_capacity: usize,
    /// Optional periodic wake-up of the session monitor. The control channel
    /// already wakes it on stop, so this is off by default.
    pub liveness_tick_ms: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            write_retry_ms: DEFAULT_WRITE_RETRY_MS,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            initial_buffer_capacity: DEFAULT_INITIAL_BUFFER_CAPACITY,
            liveness_tick_ms: None,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.read_chunk_size == 0 {
            return Err(Error::InvalidArgument("read_chunk_size must be > 0".into()));
        }
        if self.initial_buffer_capacity == 0 {
            return Err(Error::InvalidArgument(
                "initial_buffer_capacity must be > 0".into(),
            ));
        }
        if self.write_retry_ms == 0 {
            return Err(Error::InvalidArgument("write_retry_ms must be > 0".into()));
        }
        if self.liveness_tick_ms == Some(0) {
            return Err(Error::InvalidArgument(
                "liveness_tick_ms must be > 0 when set".into(),
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn write_retry(&self) -> Duration {
        Duration::from_millis(self.write_retry_ms)
    }

    pub fn liveness_tick(&self) -> Option<Duration> {
        self.liveness_tick_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = Options::default();
        options.validate().unwrap();
        assert_eq!(options.grace_period(), Duration::from_millis(200));
        assert_eq!(options.write_retry(), Duration::from_millis(50));
        assert!(options.liveness_tick().is_none());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let options = Options {
            read_chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn zero_tick_is_rejected() {
        let options = Options {
            liveness_tick_ms: Some(0),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let options: Options =
            serde_json::from_str(r#"{"grace_period_ms": 500, "liveness_tick_ms": 2000}"#).unwrap();
        assert_eq!(options.grace_period_ms, 500);
        assert_eq!(options.liveness_tick(), Some(Duration::from_secs(2)));
        assert_eq!(options.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
    }
}
