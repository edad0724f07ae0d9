//! Status events published to UI consumers

use serde::{Deserialize, Serialize};

use crate::types::endpoint::EndpointState;
use crate::types::ids::{JobId, RepositoryId};
use crate::types::job::{JobState, SyncJob};
use crate::types::status::RemoteStatus;

/// Events emitted by the core components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    EndpointChanged {
        from: EndpointState,
        to: EndpointState,
    },
    JobUpdated {
        job_id: JobId,
        repository_id: RepositoryId,
        state: JobState,
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_error: Option<String>,
        /// Needs the user's attention (abandoned, conflict, configuration)
        user_visible: bool,
    },
    SyncPaused {
        paused: bool,
    },
    RemoteStatus {
        repository_id: RepositoryId,
        status: RemoteStatus,
    },
}

impl StatusEvent {
    pub fn job_updated(job: &SyncJob, user_visible: bool) -> Self {
        StatusEvent::JobUpdated {
            job_id: job.id,
            repository_id: job.repository_id.clone(),
            state: job.state,
            attempt: job.attempt_count,
            last_error: job.last_error.clone(),
            user_visible,
        }
    }
}
