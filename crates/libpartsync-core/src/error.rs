use std::time::Duration;

use thiserror::Error;

/// Main error type for partsync operations
#[derive(Debug, Error)]
pub enum PartsyncError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PartsyncError {
    /// Get the error code for JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            PartsyncError::InvalidConfig(_) => "invalid_config",
            PartsyncError::NotFound(_) => "not_found",
            PartsyncError::Busy(_) => "busy",
            PartsyncError::Conflict(_) => "conflict",
            PartsyncError::Io(_) => "io_error",
            PartsyncError::Json(_) => "internal_error",
            PartsyncError::TomlParse(_) => "invalid_config",
            PartsyncError::TomlSerialize(_) => "internal_error",
            PartsyncError::Internal(_) => "internal_error",
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PartsyncError::InvalidConfig(_) => 2,
            PartsyncError::TomlParse(_) => 2,
            PartsyncError::NotFound(_) => 3,
            PartsyncError::Conflict(_) => 4,
            PartsyncError::Busy(_) => 5,
            PartsyncError::Io(_) => 5,
            _ => 1,
        }
    }

    /// Get actionable suggestions for fixing the error
    pub fn suggestions(&self) -> Vec<&'static str> {
        match self {
            PartsyncError::InvalidConfig(_) | PartsyncError::TomlParse(_) => vec![
                "Run 'partsync check --config <file>' to validate the configuration",
            ],
            PartsyncError::Busy(_) => vec![
                "Another partsync daemon holds the instance lock",
                "Send a 'pause' request to the running daemon, or stop it first",
            ],
            PartsyncError::Conflict(_) => vec![
                "The remote moved independently; reconcile the working tree manually",
                "Then send a 'retry' request for the repository",
            ],
            _ => vec![],
        }
    }
}

/// Job-level sync failures.
///
/// Drives the retry state machine: only transient failures and timeouts are
/// retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("attempt timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("remote diverged from {expected} (remote at {actual})")]
    Conflict { expected: String, actual: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether the retry policy applies to this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientIo(_) | SyncError::Timeout(_))
    }

    /// Whether this failure must be surfaced to the user on its own
    pub fn is_user_visible(&self) -> bool {
        matches!(self, SyncError::Conflict { .. } | SyncError::Configuration(_))
    }
}

/// Endpoint probe failures. Always absorbed by the monitor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("probe I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProbeError {
    fn from(e: std::io::Error) -> Self {
        ProbeError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_exit_with_two() {
        let err = PartsyncError::InvalidConfig("no repositories".to_string());
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.error_code(), "invalid_config");
        assert!(!err.suggestions().is_empty());
    }

    #[test]
    fn test_sync_error_classification() {
        assert!(SyncError::TransientIo("reset".into()).is_retryable());
        assert!(SyncError::Timeout(Duration::from_secs(30)).is_retryable());

        let conflict = SyncError::Conflict {
            expected: "abc".into(),
            actual: "def".into(),
        };
        assert!(!conflict.is_retryable());
        assert!(conflict.is_user_visible());
        assert!(!SyncError::Cancelled.is_retryable());
    }
}
