//! Git integration for partsync
//!
//! - [`GitBackend`]: stages, commits and pushes a change-set
//! - [`check_remote_status`]: ahead/behind against the remote branch
//! - [`pull_fast_forward`]: fast-forward-only pull
//! - [`sanitize_remote_url`]: credential-free URLs for logs

mod backend;
mod error;
mod pull;
mod remote;
mod status;
mod url;

pub use backend::GitBackend;
pub use error::GitError;
pub use pull::{pull_fast_forward, PullOutcome};
pub use status::check_remote_status;
pub use url::sanitize_remote_url;
