pub mod check;
pub mod probe;
pub mod pull;
pub mod run;
pub mod status;

use std::path::{Path, PathBuf};

use libpartsync_core::{load_config, AppConfig, PartsyncError, RepositoryBinding};

use crate::cli::Cli;

const DEFAULT_STATE_DIR: &str = ".partsync";

pub fn load(cli: &Cli) -> Result<AppConfig, PartsyncError> {
    load_config(&cli.config)
}

/// Directory holding the instance lock: `state_dir` from the config, or
/// `.partsync` next to the config file
pub fn state_dir(cli: &Cli, config: &AppConfig) -> PathBuf {
    match &config.state_dir {
        Some(dir) => dir.clone(),
        None => cli
            .config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_STATE_DIR),
    }
}

/// All bindings, or the one named by `--repository`
pub fn select_bindings(
    config: &AppConfig,
    repository: Option<&str>,
) -> Result<Vec<RepositoryBinding>, PartsyncError> {
    let bindings = config.bindings();
    match repository {
        None => Ok(bindings),
        Some(id) => {
            let selected: Vec<_> = bindings
                .into_iter()
                .filter(|b| b.id.as_str() == id)
                .collect();
            if selected.is_empty() {
                return Err(PartsyncError::NotFound(format!("repository '{}'", id)));
            }
            Ok(selected)
        }
    }
}
