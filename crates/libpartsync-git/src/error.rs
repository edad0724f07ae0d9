use git2::{ErrorClass, ErrorCode};
use libpartsync_core::{PartsyncError, SyncError};
use thiserror::Error;

/// Errors that can occur during Git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HEAD is detached in {0}")]
    DetachedHead(String),

    #[error("Not a working tree: {0}")]
    NotAWorkTree(String),

    #[error("Branch mismatch: configured {configured}, checked out {checked_out}")]
    BranchMismatch {
        configured: String,
        checked_out: String,
    },

    #[error("Remote moved: expected {expected}, found {actual}")]
    RemoteMoved { expected: String, actual: String },

    #[error("Remote branch {0} not found after fetch")]
    MissingRemoteBranch(String),

    #[error("Push rejected: {0}")]
    PushRejected(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl GitError {
    /// Map onto the job-level taxonomy that drives retries
    pub fn into_sync_error(self) -> SyncError {
        match self {
            GitError::Cancelled => SyncError::Cancelled,
            GitError::RemoteMoved { expected, actual } => SyncError::Conflict { expected, actual },
            GitError::PushRejected(msg) => SyncError::Conflict {
                expected: "fast-forward".to_string(),
                actual: msg,
            },
            GitError::DetachedHead(path) => SyncError::Conflict {
                expected: "a checked-out branch".to_string(),
                actual: format!("detached HEAD in {}", path),
            },
            e @ (GitError::NotAWorkTree(_)
            | GitError::BranchMismatch { .. }
            | GitError::MissingRemoteBranch(_)) => {
                SyncError::Configuration(e.to_string())
            }
            GitError::Io(e) => SyncError::TransientIo(e.to_string()),
            GitError::Git(e) => classify(&e),
        }
    }
}

fn classify(e: &git2::Error) -> SyncError {
    match e.code() {
        ErrorCode::NotFastForward | ErrorCode::Conflict | ErrorCode::MergeConflict => {
            return SyncError::Conflict {
                expected: "fast-forward".to_string(),
                actual: e.message().to_string(),
            };
        }
        ErrorCode::Locked => return SyncError::TransientIo(e.message().to_string()),
        ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::UnbornBranch | ErrorCode::BareRepo => {
            return SyncError::Configuration(e.message().to_string());
        }
        ErrorCode::Auth | ErrorCode::Certificate => {
            return SyncError::Configuration(e.message().to_string());
        }
        _ => {}
    }
    match e.class() {
        ErrorClass::Config | ErrorClass::Reference => SyncError::Configuration(e.message().to_string()),
        // Net, Ssh, Http, Os and whatever else libgit2 reports: worth another try
        _ => SyncError::TransientIo(e.message().to_string()),
    }
}

impl From<GitError> for SyncError {
    fn from(e: GitError) -> Self {
        e.into_sync_error()
    }
}

impl From<SyncError> for GitError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Cancelled => GitError::Cancelled,
            other => GitError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

/// One-shot commands report git failures through the CLI taxonomy
impl From<GitError> for PartsyncError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::Io(io) => PartsyncError::Io(io),
            GitError::DetachedHead(_)
            | GitError::RemoteMoved { .. }
            | GitError::PushRejected(_) => PartsyncError::Conflict(e.to_string()),
            GitError::NotAWorkTree(_) | GitError::BranchMismatch { .. } => {
                PartsyncError::InvalidConfig(e.to_string())
            }
            GitError::MissingRemoteBranch(_) => PartsyncError::NotFound(e.to_string()),
            GitError::Git(_) | GitError::Cancelled => PartsyncError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_transient() {
        let e = git2::Error::new(ErrorCode::GenericError, ErrorClass::Net, "connection reset");
        assert!(GitError::Git(e).into_sync_error().is_retryable());

        let e = git2::Error::new(ErrorCode::Locked, ErrorClass::Index, "index.lock exists");
        assert!(GitError::Git(e).into_sync_error().is_retryable());
    }

    #[test]
    fn test_rejections_are_conflicts() {
        let e = git2::Error::new(ErrorCode::NotFastForward, ErrorClass::Reference, "non-ff");
        assert!(matches!(GitError::Git(e).into_sync_error(), SyncError::Conflict { .. }));
        assert!(matches!(
            GitError::PushRejected("refs/heads/main: fetch first".into()).into_sync_error(),
            SyncError::Conflict { .. }
        ));
    }

    #[test]
    fn test_missing_remote_is_configuration() {
        let e = git2::Error::new(ErrorCode::NotFound, ErrorClass::Config, "remote 'upstream' does not exist");
        assert!(matches!(GitError::Git(e).into_sync_error(), SyncError::Configuration(_)));
    }
}
