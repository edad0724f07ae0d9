//! Notifications pushed to control clients
//!
//! Clients should treat unknown event types as ignorable.

use std::time::{SystemTime, UNIX_EPOCH};

use libpartsync_core::StatusEvent;
use serde::{Deserialize, Serialize};

use crate::CONTROL_SCHEMA_VERSION;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireNotification {
    pub schema_version: u32,
    /// Timestamp in milliseconds since Unix epoch
    pub ts_unix_ms: u64,
    pub event: StatusEvent,
}

impl WireNotification {
    pub fn new(event: StatusEvent) -> Self {
        let ts_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            schema_version: CONTROL_SCHEMA_VERSION,
            ts_unix_ms,
            event,
        }
    }

    /// Whether the event should be surfaced to a user who is not watching logs
    pub fn needs_attention(&self) -> bool {
        matches!(
            self.event,
            StatusEvent::JobUpdated {
                user_visible: true,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::OutboundMessage;
    use libpartsync_core::{EndpointState, JobId, JobState, RepositoryId};

    #[test]
    fn test_notification_line() {
        let n = WireNotification::new(StatusEvent::EndpointChanged {
            from: EndpointState::Unknown,
            to: EndpointState::Detected,
        });
        assert!(!n.needs_attention());

        let line = OutboundMessage::from(n.clone()).to_line().unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["kind"], "notification");
        assert_eq!(json["event"]["type"], "endpoint_changed");

        let back: OutboundMessage = serde_json::from_str(&line).unwrap();
        assert_eq!(back, OutboundMessage::Notification(n));
    }

    #[test]
    fn test_abandoned_job_needs_attention() {
        let n = WireNotification::new(StatusEvent::JobUpdated {
            job_id: JobId::generate(),
            repository_id: RepositoryId::from("symbols"),
            state: JobState::Abandoned,
            attempt: 5,
            last_error: Some("connection reset".to_string()),
            user_visible: true,
        });
        assert!(n.needs_attention());
    }
}
