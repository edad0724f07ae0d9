//! partsync - companion daemon for design-tool libraries
//!
//! Watches library working trees, waits for the design tool to be running,
//! and pushes coalesced changes to each repository's remote.

mod cli;
mod commands;
mod control;
mod output;
mod poller;
mod supervisor;
mod watcher;

use clap::Parser;
use cli::{Cli, Command};
use libpartsync_core::PartsyncError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run_command(&cli) {
        output::output_error(&cli, &e);
        std::process::exit(e.exit_code());
    }
}

/// Logs go to stderr; stdout carries command output and the control stream
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_command(cli: &Cli) -> Result<(), PartsyncError> {
    match &cli.command {
        Command::Run => commands::run::run(cli),
        Command::Check => commands::check::run(cli),
        Command::Status { repository } => commands::status::run(cli, repository.as_deref()),
        Command::Pull { repository } => commands::pull::run(cli, repository.as_deref()),
        Command::Probe => commands::probe::run(cli),
    }
}
