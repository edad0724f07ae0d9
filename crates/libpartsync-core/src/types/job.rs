use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change::ChangeSet;
use super::ids::{JobId, RepositoryId};

/// Lifecycle state of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Abandoned,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work: push one repository's change-set to its remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: JobId,
    pub repository_id: RepositoryId,
    pub changes: ChangeSet,
    pub state: JobState,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while an automatic retry is scheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Job created by a manual retry of this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried_by: Option<JobId>,
}

impl SyncJob {
    pub fn new(repository_id: RepositoryId, changes: ChangeSet) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            repository_id,
            changes,
            state: JobState::Queued,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            next_attempt_at: None,
            retried_by: None,
        }
    }

    /// Move to a new state, stamping `updated_at`
    pub fn transition(&mut self, state: JobState, error: Option<String>) {
        self.state = state;
        if error.is_some() {
            self.last_error = error;
        }
        if state != JobState::Failed {
            self.next_attempt_at = None;
        }
        self.updated_at = Utc::now();
    }

    /// Waiting on a scheduled automatic retry
    pub fn is_retry_pending(&self) -> bool {
        self.state == JobState::Failed && self.next_attempt_at.is_some()
    }

    /// No further automatic transition will happen
    pub fn is_settled(&self) -> bool {
        match self.state {
            JobState::Succeeded | JobState::Abandoned => true,
            JobState::Failed => self.next_attempt_at.is_none(),
            JobState::Queued | JobState::Running => false,
        }
    }

    /// Settled without success
    pub fn is_failed_terminal(&self) -> bool {
        matches!(self.state, JobState::Abandoned)
            || (self.state == JobState::Failed && self.next_attempt_at.is_none())
    }
}
