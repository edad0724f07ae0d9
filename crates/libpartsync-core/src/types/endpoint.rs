use std::fmt;

use serde::{Deserialize, Serialize};

/// Availability of the target application, as last computed by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    #[default]
    Unknown,
    Absent,
    Detected,
    Reachable,
    Lost,
}

impl EndpointState {
    /// The application was found by at least one probe strategy
    pub fn is_present(&self) -> bool {
        matches!(self, EndpointState::Detected | EndpointState::Reachable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointState::Unknown => "unknown",
            EndpointState::Absent => "absent",
            EndpointState::Detected => "detected",
            EndpointState::Reachable => "reachable",
            EndpointState::Lost => "lost",
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy deciding which endpoint states admit new sync jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncGate {
    /// Only promote jobs while the application is Detected or Reachable
    #[default]
    RequireDetected,
    /// Promote jobs regardless of the application's presence
    Always,
}

impl SyncGate {
    pub fn from_sync_while_absent(allow: bool) -> Self {
        if allow {
            SyncGate::Always
        } else {
            SyncGate::RequireDetected
        }
    }

    pub fn admits(&self, state: EndpointState) -> bool {
        match self {
            SyncGate::RequireDetected => state.is_present(),
            SyncGate::Always => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gate_requires_detection() {
        let gate = SyncGate::default();
        assert!(gate.admits(EndpointState::Detected));
        assert!(gate.admits(EndpointState::Reachable));
        assert!(!gate.admits(EndpointState::Unknown));
        assert!(!gate.admits(EndpointState::Absent));
        assert!(!gate.admits(EndpointState::Lost));
    }

    #[test]
    fn test_permissive_gate() {
        let gate = SyncGate::from_sync_while_absent(true);
        assert!(gate.admits(EndpointState::Absent));
        assert!(gate.admits(EndpointState::Lost));
    }
}
