//! Control protocol messages
//!
//! A client drives a running supervisor by writing one JSON request per
//! line to its stdin. Responses and notifications are written to stdout,
//! one JSON object per line, distinguished by their `kind` field.

use serde::{Deserialize, Serialize};

use crate::error::IpcError;
use crate::notifications::WireNotification;
use crate::CONTROL_SCHEMA_VERSION;

/// Request from a control client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Echoed in the response; generated when the client omits it
    #[serde(default = "generate_request_id")]
    pub request_id: String,
    #[serde(flatten)]
    pub command: ControlCommand,
}

fn default_schema_version() -> u32 {
    CONTROL_SCHEMA_VERSION
}

fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ControlRequest {
    pub fn new(command: ControlCommand) -> Self {
        Self {
            schema_version: CONTROL_SCHEMA_VERSION,
            request_id: generate_request_id(),
            command,
        }
    }

    /// Decode one input line
    pub fn parse(line: &str) -> Result<Self, IpcError> {
        let request: ControlRequest = serde_json::from_str(line.trim())
            .map_err(|e| IpcError::MalformedRequest(e.to_string()))?;
        if request.schema_version != CONTROL_SCHEMA_VERSION {
            return Err(IpcError::VersionMismatch {
                expected: CONTROL_SCHEMA_VERSION,
                actual: request.schema_version,
            });
        }
        Ok(request)
    }
}

/// User intents accepted over the control channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Re-run the latest failed or abandoned job of a repository
    Retry { repository: String },
    Pause,
    Resume,
    Status,
    /// Ask the supervisor to stop gracefully
    Shutdown,
}

impl ControlCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::Retry { .. } => "retry",
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::Status => "status",
            ControlCommand::Shutdown => "shutdown",
        }
    }
}

/// Reply to a single request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub schema_version: u32,
    pub request_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ControlResponse {
    pub fn success(request_id: String, data: Option<serde_json::Value>) -> Self {
        Self {
            schema_version: CONTROL_SCHEMA_VERSION,
            request_id,
            ok: true,
            data,
            error: None,
        }
    }

    pub fn error(request_id: String, code: &str, message: String) -> Self {
        Self {
            schema_version: CONTROL_SCHEMA_VERSION,
            request_id,
            ok: false,
            data: None,
            error: Some(ErrorPayload {
                code: code.to_string(),
                message,
                details: None,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Anything written to the control output stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    Response(ControlResponse),
    Notification(WireNotification),
}

impl OutboundMessage {
    /// Serialize as a single line, without the trailing newline
    pub fn to_line(&self) -> Result<String, IpcError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<ControlResponse> for OutboundMessage {
    fn from(response: ControlResponse) -> Self {
        OutboundMessage::Response(response)
    }
}

impl From<WireNotification> for OutboundMessage {
    fn from(notification: WireNotification) -> Self {
        OutboundMessage::Notification(notification)
    }
}
