//! Status command: ahead/behind for each repository

use libpartsync_core::{PartsyncError, RemoteStatus};
use libpartsync_git::check_remote_status;
use serde::Serialize;
use tracing::warn;

use crate::cli::Cli;
use crate::commands::{load, select_bindings};
use crate::output::output_success;

#[derive(Serialize)]
struct RepositoryStatus {
    id: String,
    #[serde(flatten)]
    status: RemoteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct StatusOutput {
    repositories: Vec<RepositoryStatus>,
}

pub fn run(cli: &Cli, repository: Option<&str>) -> Result<(), PartsyncError> {
    let config = load(cli)?;
    let bindings = select_bindings(&config, repository)?;

    let repositories = bindings
        .iter()
        .map(|b| {
            match check_remote_status(&b.local_path, &b.remote, b.branch.as_deref()) {
                Ok(status) => RepositoryStatus {
                    id: b.id.to_string(),
                    status,
                    error: None,
                },
                Err(e) => {
                    warn!(repository = %b.id, error = %e, "remote status unavailable");
                    RepositoryStatus {
                        id: b.id.to_string(),
                        status: RemoteStatus::Unknown,
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .collect();

    output_success(cli, &StatusOutput { repositories }, |out| {
        for repo in &out.repositories {
            match &repo.error {
                Some(err) => println!("{}: {} ({})", repo.id, repo.status, err),
                None => println!("{}: {}", repo.id, repo.status),
            }
        }
    });
    Ok(())
}
