//! Run command: the foreground daemon

use std::time::Duration;

use libpartsync_core::PartsyncError;

use crate::cli::Cli;
use crate::commands::{load, state_dir};
use crate::supervisor::Supervisor;

/// Blocking stdin reads can outlive the supervisor
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

pub fn run(cli: &Cli) -> Result<(), PartsyncError> {
    // Configuration errors abort before anything is started
    let config = load(cli)?;
    let state_dir = state_dir(cli, &config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("partsync")
        .build()?;
    let result = runtime.block_on(Supervisor::new(config, cli.config.clone(), state_dir).run());
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}
