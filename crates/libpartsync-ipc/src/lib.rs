//! Process-level plumbing for the partsync supervisor
//!
//! This crate provides:
//! - The system endpoint probe (IPC handshake plus process enumeration)
//! - Control protocol messages exchanged over stdin/stdout as JSON lines
//! - Wire notifications wrapping orchestrator status events
//! - The single-instance lock (InstanceGuard plus the InstanceLock lease)

pub mod error;
pub mod lock;
pub mod messages;
pub mod notifications;
pub mod probe;

pub use error::IpcError;
pub use lock::{InstanceGuard, InstanceLock};
pub use messages::{ControlCommand, ControlRequest, ControlResponse, ErrorPayload};
pub use notifications::WireNotification;
pub use probe::SystemProbe;

/// Current control protocol schema version
pub const CONTROL_SCHEMA_VERSION: u32 = 1;

/// Default lease duration for the instance lock in milliseconds
pub const DEFAULT_LEASE_MS: u64 = 30_000;
