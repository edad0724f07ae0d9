use std::fmt;

use serde::{Deserialize, Serialize};

/// Relationship between a working tree's branch and its remote counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    Clean,
    Ahead { commits: usize },
    Behind { commits: usize },
    Diverged { ahead: usize, behind: usize },
    Detached,
    Unknown,
}

impl RemoteStatus {
    pub fn from_counts(ahead: usize, behind: usize) -> Self {
        match (ahead, behind) {
            (0, 0) => RemoteStatus::Clean,
            (a, 0) => RemoteStatus::Ahead { commits: a },
            (0, b) => RemoteStatus::Behind { commits: b },
            (a, b) => RemoteStatus::Diverged { ahead: a, behind: b },
        }
    }

    /// Anything other than clean needs attention
    pub fn needs_attention(&self) -> bool {
        !matches!(self, RemoteStatus::Clean)
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStatus::Clean => write!(f, "clean"),
            RemoteStatus::Ahead { commits } => write!(f, "ahead by {}", commits),
            RemoteStatus::Behind { commits } => write!(f, "behind by {}", commits),
            RemoteStatus::Diverged { ahead, behind } => {
                write!(f, "diverged (ahead {}, behind {})", ahead, behind)
            }
            RemoteStatus::Detached => write!(f, "detached HEAD"),
            RemoteStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_counts() {
        assert_eq!(RemoteStatus::from_counts(0, 0), RemoteStatus::Clean);
        assert_eq!(RemoteStatus::from_counts(2, 0), RemoteStatus::Ahead { commits: 2 });
        assert_eq!(RemoteStatus::from_counts(0, 3), RemoteStatus::Behind { commits: 3 });
        assert_eq!(
            RemoteStatus::from_counts(1, 1),
            RemoteStatus::Diverged { ahead: 1, behind: 1 }
        );
        assert!(!RemoteStatus::Clean.needs_attention());
    }
}
