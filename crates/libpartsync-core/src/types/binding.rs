use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ids::RepositoryId;

pub const DEFAULT_REMOTE: &str = "origin";

/// Association between a watched working tree and its remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryBinding {
    pub id: RepositoryId,
    pub local_path: PathBuf,
    /// Remote name in the working tree's git config
    pub remote: String,
    /// Informational only; the working tree's remote config is authoritative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Branch to push; the checked-out branch when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_revision: Option<String>,
}

impl RepositoryBinding {
    pub fn new(id: impl Into<RepositoryId>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            local_path: local_path.into(),
            remote: DEFAULT_REMOTE.to_string(),
            remote_url: None,
            branch: None,
            last_synced_revision: None,
        }
    }

    /// Whether `path` lies inside this binding's working tree
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.local_path)
    }
}
