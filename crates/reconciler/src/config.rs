//! Controller configuration.

use std::path::Path;
use std::time::Duration;

use polsync_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::queue::ItemBackoff;

/// Settings shared by every controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Worker tasks per controller.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// First retry delay of a failed key, in milliseconds.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound of the retry delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How long to wait for the source cache to finish its initial listing.
    #[serde(default = "default_cache_sync_timeout_ms")]
    pub cache_sync_timeout_ms: u64,

    /// Poll interval while waiting for the cache.
    #[serde(default = "default_cache_sync_poll_ms")]
    pub cache_sync_poll_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            cache_sync_timeout_ms: default_cache_sync_timeout_ms(),
            cache_sync_poll_ms: default_cache_sync_poll_ms(),
        }
    }
}

impl ControllerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&contents)
    }

    /// Reject settings a controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.base_backoff_ms == 0 {
            return Err(Error::invalid_config("base_backoff_ms must be positive"));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(Error::invalid_config(format!(
                "max_backoff_ms ({}) is below base_backoff_ms ({})",
                self.max_backoff_ms, self.base_backoff_ms
            )));
        }
        if self.cache_sync_poll_ms == 0 {
            return Err(Error::invalid_config("cache_sync_poll_ms must be positive"));
        }
        Ok(())
    }

    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the retry delay bounds.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff_ms = duration_ms(base);
        self.max_backoff_ms = duration_ms(max);
        self
    }

    /// Set the cache sync timeout.
    #[must_use]
    pub const fn with_cache_sync_timeout(mut self, timeout: Duration) -> Self {
        self.cache_sync_timeout_ms = duration_ms(timeout);
        self
    }

    /// First retry delay.
    pub const fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    /// Retry delay cap.
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub const fn cache_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_sync_timeout_ms)
    }

    pub const fn cache_sync_poll(&self) -> Duration {
        Duration::from_millis(self.cache_sync_poll_ms)
    }

    /// Fresh per-key backoff with these bounds.
    pub fn backoff(&self) -> ItemBackoff {
        ItemBackoff::new(self.base_backoff(), self.max_backoff())
    }
}

const fn duration_ms(d: Duration) -> u64 {
    let ms = d.as_millis();
    if ms > u64::MAX as u128 { u64::MAX } else { ms as u64 }
}

const fn default_workers() -> usize {
    2
}

const fn default_base_backoff_ms() -> u64 {
    5
}

const fn default_max_backoff_ms() -> u64 {
    1_000_000
}

const fn default_cache_sync_timeout_ms() -> u64 {
    30_000
}

const fn default_cache_sync_poll_ms() -> u64 {
    100
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ControllerConfig::from_toml_str("");

        assert_eq!(config, Ok(ControllerConfig::default()));
    }

    #[test]
    fn test_partial_document_overrides() {
        let config = ControllerConfig::from_toml_str("workers = 8\nmax_backoff_ms = 2000\n").unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.max_backoff(), Duration::from_secs(2));
        assert_eq!(config.base_backoff(), Duration::from_millis(5));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = ControllerConfig::from_toml_str("workers = 0");

        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_max_below_base_rejected() {
        let config = ControllerConfig::default()
            .with_backoff(Duration::from_secs(2), Duration::from_secs(1));

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_is_a_parse_error() {
        let result = ControllerConfig::from_toml_str("wrokers = 3");

        assert!(matches!(result, Err(Error::TomlParseFailed { .. })));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let result = ControllerConfig::load("/nonexistent/polsync.toml");

        assert!(matches!(result, Err(Error::FileReadFailed { .. })));
    }
}
