use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "partsync",
    about = "Keep design-tool library folders in sync with their git remotes",
    version
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human-readable output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Configuration file
    #[arg(long, short, global = true, default_value = "partsync.toml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the sync daemon in the foreground
    Run,

    /// Validate the configuration and list repository bindings
    Check,

    /// Show each repository's position relative to its remote
    Status {
        /// Only this repository
        #[arg(long, short)]
        repository: Option<String>,
    },

    /// Fast-forward repositories to their remote branch
    Pull {
        /// Only this repository
        #[arg(long, short)]
        repository: Option<String>,
    },

    /// Check once whether the design tool is running
    Probe,
}
