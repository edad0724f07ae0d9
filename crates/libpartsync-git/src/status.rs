//! Ahead/behind status of a working tree against its remote

use std::path::Path;

use git2::Repository;
use libpartsync_core::RemoteStatus;
use tracing::debug;

use crate::remote::{ahead_behind, fetch_branch, resolve_branch, tracking_ref};
use crate::GitError;

/// Fetch the branch and compare HEAD with the remote-tracking tip.
///
/// A detached HEAD is reported as [`RemoteStatus::Detached`] rather than an
/// error.
pub fn check_remote_status(
    path: &Path,
    remote: &str,
    branch: Option<&str>,
) -> Result<RemoteStatus, GitError> {
    let repo = Repository::open(path)?;
    if repo.head_detached()? {
        return Ok(RemoteStatus::Detached);
    }
    let branch = resolve_branch(&repo, branch)?;

    let tip = fetch_branch(&repo, remote, &branch, None)?
        .ok_or_else(|| GitError::MissingRemoteBranch(tracking_ref(remote, &branch)))?;
    let head = repo.head()?.peel_to_commit()?.id();

    let (ahead, behind) = ahead_behind(&repo, head, tip)?;
    debug!(path = %path.display(), branch = %branch, ahead, behind, "remote status");
    Ok(RemoteStatus::from_counts(ahead, behind))
}
