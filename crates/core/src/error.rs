//! Core error type shared by every polsync crate.
//!
//! Errors fall into four classes that drive controller behaviour:
//!
//! - **Not found** - an expected lookup outcome, absorbed by the reconciler.
//! - **Transient** - store failures, conflicts and races; requeued with backoff.
//! - **Invalid write** - the derived store rejected an update; triggers self-heal.
//! - **Malformed input** - retrying cannot help without new input; skipped.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for polsync operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Store lookups and writes
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: String },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: String },

    #[error("conflict writing {kind} '{key}': {reason}")]
    Conflict {
        kind: String,
        key: String,
        reason: String,
    },

    #[error("store operation '{operation}' failed: {reason}")]
    StoreFailed { operation: String, reason: String },

    #[error("{kind} '{key}' is invalid: {reason}")]
    Invalid {
        kind: String,
        key: String,
        reason: String,
    },

    // Input that cannot succeed on retry
    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },

    #[error("cannot convert {kind} '{key}': {reason}")]
    ConversionFailed {
        kind: String,
        key: String,
        reason: String,
    },

    // Files and parsing
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },

    #[error("YAML parse error: {reason}")]
    YamlParseFailed { reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    // Controller lifecycle
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("caches for controller '{controller}' did not sync within {timeout_ms}ms")]
    CacheSyncTimeout { controller: String, timeout_ms: u64 },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create a write conflict error.
    pub fn conflict(
        kind: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a store failure error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid write error.
    pub fn invalid(
        kind: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            kind: kind.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed input error.
    pub fn malformed_input(reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            reason: reason.into(),
        }
    }

    /// Create a conversion error.
    pub fn conversion_failed(
        kind: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ConversionFailed {
            kind: kind.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse_failed(reason: impl Into<String>) -> Self {
        Self::JsonParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a YAML parse error.
    pub fn yaml_parse_failed(reason: impl Into<String>) -> Self {
        Self::YamlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a cache sync timeout error.
    pub fn cache_sync_timeout(controller: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CacheSyncTimeout {
            controller: controller.into(),
            timeout_ms,
        }
    }

    /// Whether this error reports a missing object.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the derived store rejected a write as semantically invalid.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }

    /// Whether requeueing the key can make progress without new input.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::AlreadyExists { .. }
                | Self::Conflict { .. }
                | Self::StoreFailed { .. }
                | Self::Invalid { .. }
                | Self::CacheSyncTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::store_failed("update", "connection reset");
        assert!(err.to_string().contains("update"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_not_found_is_distinguishable() {
        let err = Error::not_found("Role", "a/r1");
        assert!(err.is_not_found());
        assert!(!err.is_invalid());
        assert_eq!(err.to_string(), "Role 'a/r1' not found");
    }

    #[test]
    fn test_invalid_is_retryable() {
        let err = Error::invalid("RoleBinding", "a/b1", "roleRef is immutable");
        assert!(err.is_invalid());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_malformed_input_is_terminal() {
        assert!(!Error::malformed_input("unexpected key format").is_retryable());
        assert!(!Error::conversion_failed("Role", "a/r1", "attribute restrictions").is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::conflict("Role", "a/r1", "stale resource version").is_retryable());
        assert!(Error::already_exists("Role", "a/r1").is_retryable());
    }
}
