//! IPC error types

use libpartsync_core::PartsyncError;
use thiserror::Error;

/// Errors raised by the lock, probes and control protocol
#[derive(Error, Debug)]
pub enum IpcError {
    /// Lock file exists but cannot be interpreted
    #[error("Lock file error: {0}")]
    LockFile(String),

    /// Lock is held by another process
    #[error("Lock held by process {pid} (expires in {expires_in_ms}ms)")]
    LockHeld { pid: u32, expires_in_ms: u64 },

    /// The state directory's exclusive file lock is taken
    #[error("State directory locked by another process: {0}")]
    StateDirBusy(String),

    /// A control line could not be decoded
    #[error("Malformed control request: {0}")]
    MalformedRequest(String),

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IpcError {
    pub fn code(&self) -> &'static str {
        match self {
            IpcError::LockFile(_) => codes::LOCK_ERROR,
            IpcError::LockHeld { .. } | IpcError::StateDirBusy(_) => codes::BUSY,
            IpcError::MalformedRequest(_) | IpcError::VersionMismatch { .. } => {
                codes::INVALID_INPUT
            }
            IpcError::Io(_) => codes::IO_ERROR,
            IpcError::Json(_) => codes::INVALID_INPUT,
        }
    }
}

impl From<IpcError> for PartsyncError {
    fn from(e: IpcError) -> Self {
        match e {
            IpcError::LockHeld { .. } | IpcError::StateDirBusy(_) => {
                PartsyncError::Busy(e.to_string())
            }
            IpcError::Io(io) => PartsyncError::Io(io),
            IpcError::Json(json) => PartsyncError::Json(json),
            other => PartsyncError::Internal(other.to_string()),
        }
    }
}

/// Error codes used in control responses
pub mod codes {
    pub const BUSY: &str = "busy";
    pub const NOT_FOUND: &str = "not_found";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INTERNAL: &str = "internal_error";
    pub const IO_ERROR: &str = "io_error";
    pub const LOCK_ERROR: &str = "lock_error";
}
