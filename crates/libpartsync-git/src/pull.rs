//! Fast-forward-only pull

use std::path::Path;

use git2::build::CheckoutBuilder;
use git2::Repository;
use serde::Serialize;
use tracing::info;

use crate::remote::{ahead_behind, fetch_branch, resolve_branch, tracking_ref};
use crate::GitError;

/// What a pull did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PullOutcome {
    UpToDate,
    /// Local commits not yet on the remote; nothing to pull
    Ahead { commits: usize },
    FastForwarded { from: String, to: String, commits: usize },
    /// Both sides moved. Never merged automatically.
    Diverged { ahead: usize, behind: usize },
}

/// Fetch and fast-forward the checked-out branch to its remote tip.
///
/// The checkout is safe: it refuses to overwrite local modifications.
pub fn pull_fast_forward(
    path: &Path,
    remote: &str,
    branch: Option<&str>,
) -> Result<PullOutcome, GitError> {
    let repo = Repository::open(path)?;
    let branch = resolve_branch(&repo, branch)?;
    let tip = fetch_branch(&repo, remote, &branch, None)?
        .ok_or_else(|| GitError::MissingRemoteBranch(tracking_ref(remote, &branch)))?;

    let mut head_ref = repo.head()?;
    let head = head_ref.peel_to_commit()?.id();
    let (ahead, behind) = ahead_behind(&repo, head, tip)?;

    match (ahead, behind) {
        (0, 0) => Ok(PullOutcome::UpToDate),
        (a, 0) => Ok(PullOutcome::Ahead { commits: a }),
        (0, b) => {
            let target = repo.find_object(tip, None)?;
            repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
            head_ref.set_target(tip, &format!("partsync: fast-forward to {}", tip))?;
            info!(path = %path.display(), branch = %branch, from = %head, to = %tip, "fast-forwarded");
            Ok(PullOutcome::FastForwarded {
                from: head.to_string(),
                to: tip.to_string(),
                commits: b,
            })
        }
        (a, b) => Ok(PullOutcome::Diverged { ahead: a, behind: b }),
    }
}
