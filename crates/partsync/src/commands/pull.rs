//! Pull command: fast-forward working trees to their remote branch

use libpartsync_core::PartsyncError;
use libpartsync_git::{pull_fast_forward, PullOutcome};
use libpartsync_ipc::{InstanceGuard, InstanceLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::commands::{load, select_bindings, state_dir};
use crate::output::output_success;

#[derive(Serialize)]
struct RepositoryPull {
    id: String,
    #[serde(flatten)]
    outcome: Option<PullOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct PullOutput {
    repositories: Vec<RepositoryPull>,
}

pub fn run(cli: &Cli, repository: Option<&str>) -> Result<(), PartsyncError> {
    let config = load(cli)?;
    let bindings = select_bindings(&config, repository)?;

    // A running daemon may be mid-commit in the same working trees
    let state_dir = state_dir(cli, &config);
    if let Some(lock) = InstanceLock::held_by_other(&state_dir)? {
        return Err(PartsyncError::Busy(format!(
            "partsync daemon (PID {}) is running, lease expires in {}s",
            lock.pid,
            lock.time_remaining_ms() / 1000
        )));
    }

    // Keeps a daemon from starting while the pull runs
    let _guard = InstanceGuard::try_acquire(&state_dir)?;

    let mut repositories = Vec::with_capacity(bindings.len());
    for b in &bindings {
        match pull_fast_forward(&b.local_path, &b.remote, b.branch.as_deref()) {
            Ok(outcome) => {
                info!(repository = %b.id, ?outcome, "pull finished");
                repositories.push(RepositoryPull {
                    id: b.id.to_string(),
                    outcome: Some(outcome),
                    error: None,
                });
            }
            // A single named repository reports its own failure
            Err(e) if repository.is_some() => return Err(e.into()),
            Err(e) => {
                warn!(repository = %b.id, error = %e, "pull failed");
                repositories.push(RepositoryPull {
                    id: b.id.to_string(),
                    outcome: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    output_success(cli, &PullOutput { repositories }, |out| {
        for repo in &out.repositories {
            match (&repo.outcome, &repo.error) {
                (Some(PullOutcome::UpToDate), _) => println!("{}: up to date", repo.id),
                (Some(PullOutcome::Ahead { commits }), _) => {
                    println!("{}: {} local commit(s) not yet pushed", repo.id, commits)
                }
                (Some(PullOutcome::FastForwarded { to, commits, .. }), _) => println!(
                    "{}: fast-forwarded {} commit(s) to {}",
                    repo.id,
                    commits,
                    &to[..7.min(to.len())]
                ),
                (Some(PullOutcome::Diverged { ahead, behind }), _) => println!(
                    "{}: diverged (ahead {}, behind {}), reconcile manually",
                    repo.id, ahead, behind
                ),
                (None, Some(err)) => println!("{}: failed: {}", repo.id, err),
                (None, None) => {}
            }
        }
    });
    Ok(())
}
