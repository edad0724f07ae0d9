//! Check command: validate the configuration

use std::path::PathBuf;

use libpartsync_core::PartsyncError;
use libpartsync_git::sanitize_remote_url;
use serde::Serialize;

use crate::cli::Cli;
use crate::commands::{load, state_dir};
use crate::output::output_success;

#[derive(Serialize)]
struct BindingOutput {
    id: String,
    local_path: PathBuf,
    remote: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
}

#[derive(Serialize)]
struct CheckOutput {
    config: PathBuf,
    state_dir: PathBuf,
    max_concurrent_jobs: usize,
    sync_while_absent: bool,
    repositories: Vec<BindingOutput>,
}

pub fn run(cli: &Cli) -> Result<(), PartsyncError> {
    let config = load(cli)?;

    let output = CheckOutput {
        config: cli.config.clone(),
        state_dir: state_dir(cli, &config),
        max_concurrent_jobs: config.max_concurrent_jobs,
        sync_while_absent: config.sync_while_absent,
        repositories: config
            .bindings()
            .into_iter()
            .map(|b| BindingOutput {
                id: b.id.to_string(),
                local_path: b.local_path,
                remote: b.remote,
                remote_url: b.remote_url.as_deref().map(sanitize_remote_url),
                branch: b.branch,
            })
            .collect(),
    };

    output_success(cli, &output, |out| {
        println!("Configuration OK: {}", out.config.display());
        for repo in &out.repositories {
            println!(
                "  {} -> {} ({}{})",
                repo.id,
                repo.local_path.display(),
                repo.remote,
                repo.branch
                    .as_deref()
                    .map(|b| format!("/{}", b))
                    .unwrap_or_default()
            );
        }
    });
    Ok(())
}
