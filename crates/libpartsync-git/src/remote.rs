//! Fetch and push plumbing shared by the sync backend, status and pull

use std::cell::RefCell;
use std::rc::Rc;

use git2::{
    Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, Oid, PushOptions, RemoteCallbacks,
    Repository,
};
use libpartsync_core::SyncContext;
use tracing::debug;

use crate::url::sanitize_remote_url;
use crate::GitError;

const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// Branch to operate on: the configured one, else the checked-out one
pub fn resolve_branch(repo: &Repository, configured: Option<&str>) -> Result<String, GitError> {
    let path = repo.path().display().to_string();
    if repo.head_detached()? {
        return Err(GitError::DetachedHead(path));
    }
    let head = repo.head()?;
    let checked_out = head
        .shorthand()
        .map(str::to_string)
        .ok_or_else(|| GitError::DetachedHead(path))?;

    match configured {
        Some(branch) if branch != checked_out => Err(GitError::BranchMismatch {
            configured: branch.to_string(),
            checked_out,
        }),
        _ => Ok(checked_out),
    }
}

/// Callbacks with credentials (ssh-agent, credential helper, default) and
/// cancellation through the transfer progress hook
fn callbacks<'a>(repo: &Repository, ctx: Option<&'a SyncContext>) -> RemoteCallbacks<'a> {
    let config = repo.config().ok();
    let mut attempts = 0;

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Callback,
                format!("authentication failed for {}", sanitize_remote_url(url)),
            ));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            if let Some(user) = username {
                return Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Some(config) = &config {
                if let Ok(cred) = Cred::credential_helper(config, url, username) {
                    return Ok(cred);
                }
            }
        }
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(username.unwrap_or("git"));
        }
        Cred::default()
    });
    callbacks.transfer_progress(move |_stats| ctx.map_or(true, |c| !c.is_cancelled()));
    callbacks
}

pub fn tracking_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{}/{}", remote, branch)
}

/// Fetch one branch into its remote-tracking ref. Returns the remote tip,
/// `None` when the remote has no such branch yet.
pub fn fetch_branch(
    repo: &Repository,
    remote_name: &str,
    branch: &str,
    ctx: Option<&SyncContext>,
) -> Result<Option<Oid>, GitError> {
    let mut remote = repo.find_remote(remote_name)?;
    if let Some(url) = remote.url() {
        debug!(remote = remote_name, url = %sanitize_remote_url(url), branch, "fetching");
    }

    let refspec = format!("+refs/heads/{}:{}", branch, tracking_ref(remote_name, branch));
    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks(repo, ctx));

    if let Err(e) = remote.fetch(&[refspec.as_str()], Some(&mut fetch_options), None) {
        if ctx.is_some_and(SyncContext::is_cancelled) {
            return Err(GitError::Cancelled);
        }
        return Err(e.into());
    }

    match repo.refname_to_id(&tracking_ref(remote_name, branch)) {
        Ok(oid) => Ok(Some(oid)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Push a local branch to the same name on the remote.
///
/// A rejected reference update is reported as `PushRejected`.
pub fn push_branch(
    repo: &Repository,
    remote_name: &str,
    branch: &str,
    ctx: Option<&SyncContext>,
) -> Result<(), GitError> {
    let mut remote = repo.find_remote(remote_name)?;
    let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);

    let push_error: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let push_error_clone = Rc::clone(&push_error);

    let mut callbacks = callbacks(repo, ctx);
    callbacks.push_update_reference(move |refname, status| {
        if let Some(msg) = status {
            *push_error_clone.borrow_mut() = Some(format!("{}: {}", refname, msg));
        }
        Ok(())
    });

    let mut push_options = PushOptions::new();
    push_options.remote_callbacks(callbacks);

    remote.push(&[refspec.as_str()], Some(&mut push_options))?;

    let error = push_error.borrow().clone();
    if let Some(error_msg) = error {
        return Err(GitError::PushRejected(error_msg));
    }
    Ok(())
}

/// Commits on `local` missing from `upstream`, and the reverse
pub fn ahead_behind(repo: &Repository, local: Oid, upstream: Oid) -> Result<(usize, usize), GitError> {
    Ok(repo.graph_ahead_behind(local, upstream)?)
}
