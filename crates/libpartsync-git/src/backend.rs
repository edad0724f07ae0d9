//! `SyncBackend` that stages, commits and pushes a working tree

use std::path::{Path, PathBuf};

use git2::{IndexAddOption, Oid, Repository, Signature};
use libpartsync_core::{
    ChangeKind, ChangeSet, RepositoryBinding, SyncBackend, SyncContext, SyncError, SyncOutcome,
};
use tracing::{debug, info};

use crate::remote::{fetch_branch, push_branch, resolve_branch};
use crate::GitError;

const COMMIT_NAME: &str = "partsync";
const COMMIT_EMAIL: &str = "partsync@localhost";
const MAX_LISTED_PATHS: usize = 20;

/// Pushes change-sets with libgit2.
///
/// Each atomic unit (index write, commit, ref update on push) either lands
/// completely or not at all; cancellation is honoured between them.
#[derive(Debug, Clone, Default)]
pub struct GitBackend;

impl GitBackend {
    pub fn new() -> Self {
        Self
    }

    fn run(
        &self,
        binding: &RepositoryBinding,
        changes: &ChangeSet,
        ctx: &SyncContext,
    ) -> Result<SyncOutcome, GitError> {
        let repo = Repository::open(&binding.local_path)?;
        let branch = resolve_branch(&repo, binding.branch.as_deref())?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::NotAWorkTree(binding.local_path.display().to_string()))?
            .to_path_buf();
        ctx.checkpoint()?;

        // Unit 1: the index
        let mut index = repo.index()?;
        let mut staged = 0usize;
        for event in changes.events() {
            if let Some(from) = &event.renamed_from {
                staged += stage(&repo, &mut index, &workdir, from)? as usize;
            }
            staged += stage(&repo, &mut index, &workdir, &event.path)? as usize;
        }
        index.write()?;
        let tree_id = index.write_tree()?;
        debug!(repository = %binding.id, staged, "index written");
        ctx.checkpoint()?;

        let head = repo.head()?.peel_to_commit()?;
        let head_id = head.id().to_string();
        let tree_changed = head.tree_id() != tree_id;
        if !tree_changed && binding.last_synced_revision.as_deref() == Some(head_id.as_str()) {
            debug!(repository = %binding.id, revision = %head_id, "already in sync");
            return Ok(SyncOutcome {
                revision: head_id,
                applied: false,
            });
        }

        let remote_tip = fetch_branch(&repo, &binding.remote, &branch, Some(ctx))?;
        ctx.checkpoint()?;
        if let Some(tip) = remote_tip {
            check_not_diverged(&repo, binding, head.id(), tip)?;
        }

        // Unit 2: the commit and its ref update
        let revision = if tree_changed {
            let tree = repo.find_tree(tree_id)?;
            let signature = repo
                .signature()
                .or_else(|_| Signature::now(COMMIT_NAME, COMMIT_EMAIL))?;
            let message = commit_message(changes, &workdir);
            let oid = repo.commit(Some("HEAD"), &signature, &signature, &message, &tree, &[&head])?;
            info!(repository = %binding.id, commit = %oid, "committed changes");
            oid
        } else {
            head.id()
        };
        ctx.checkpoint()?;

        // Unit 3: the remote ref
        let push_needed = remote_tip != Some(revision);
        if push_needed {
            push_branch(&repo, &binding.remote, &branch, Some(ctx))?;
            info!(repository = %binding.id, branch = %branch, revision = %revision, "pushed");
        }

        Ok(SyncOutcome {
            revision: revision.to_string(),
            applied: tree_changed || push_needed,
        })
    }
}

impl SyncBackend for GitBackend {
    fn sync(
        &self,
        binding: &RepositoryBinding,
        changes: &ChangeSet,
        ctx: &SyncContext,
    ) -> Result<SyncOutcome, SyncError> {
        self.run(binding, changes, ctx).map_err(|e| {
            if ctx.is_cancelled() {
                SyncError::Cancelled
            } else {
                e.into_sync_error()
            }
        })
    }
}

/// The remote must still be where we left it, or behind our HEAD
fn check_not_diverged(
    repo: &Repository,
    binding: &RepositoryBinding,
    head: Oid,
    remote_tip: Oid,
) -> Result<(), GitError> {
    let expected = binding.last_synced_revision.as_deref();
    if expected == Some(remote_tip.to_string().as_str()) || remote_tip == head {
        return Ok(());
    }
    if repo.graph_descendant_of(head, remote_tip)? {
        return Ok(());
    }
    Err(GitError::RemoteMoved {
        expected: expected.map_or_else(|| head.to_string(), str::to_string),
        actual: remote_tip.to_string(),
    })
}

/// Stage the current working-tree state of one path. Returns whether the
/// path belonged to this working tree.
fn stage(
    repo: &Repository,
    index: &mut git2::Index,
    workdir: &Path,
    path: &Path,
) -> Result<bool, GitError> {
    let Some(rel) = relative_to(workdir, path) else {
        debug!(path = %path.display(), "path outside working tree, not staged");
        return Ok(false);
    };
    if rel.as_os_str().is_empty() || repo.is_path_ignored(&rel)? {
        return Ok(false);
    }

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            index.add_all([rel.as_path()], IndexAddOption::DEFAULT, None)?;
        }
        Ok(_) => {
            index.add_path(&rel)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if index.get_path(&rel, 0).is_some() {
                index.remove_path(&rel)?;
            } else {
                // Possibly a removed directory
                index.remove_all([rel.as_path()], None)?;
            }
        }
        Err(e) => return Err(e.into()),
    }
    Ok(true)
}

fn relative_to(workdir: &Path, path: &Path) -> Option<PathBuf> {
    if let Ok(rel) = path.strip_prefix(workdir) {
        return Some(rel.to_path_buf());
    }
    let canonical = std::fs::canonicalize(workdir).ok()?;
    path.strip_prefix(&canonical).ok().map(Path::to_path_buf)
}

fn commit_message(changes: &ChangeSet, workdir: &Path) -> String {
    let mut message = format!(
        "partsync: update {} file{}\n\n",
        changes.len(),
        if changes.len() == 1 { "" } else { "s" }
    );
    for event in changes.events().take(MAX_LISTED_PATHS) {
        let marker = match event.kind {
            ChangeKind::Created => 'A',
            ChangeKind::Modified => 'M',
            ChangeKind::Deleted => 'D',
            ChangeKind::Renamed => 'R',
        };
        let shown = relative_to(workdir, &event.path).unwrap_or_else(|| event.path.clone());
        message.push_str(&format!("{} {}\n", marker, shown.display()));
    }
    if changes.len() > MAX_LISTED_PATHS {
        message.push_str(&format!("... and {} more\n", changes.len() - MAX_LISTED_PATHS));
    }
    message
}
