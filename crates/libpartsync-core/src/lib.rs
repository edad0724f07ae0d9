pub mod types;
pub mod backend;
pub mod collector;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod ledger;
pub mod orchestrator;
pub mod retry;

pub use error::{PartsyncError, ProbeError, SyncError};
pub use types::binding::RepositoryBinding;
pub use types::change::{ChangeEvent, ChangeKind, ChangeSet, RawChange};
pub use types::endpoint::{EndpointState, SyncGate};
pub use types::ids::{JobId, RepositoryId};
pub use types::job::{JobState, SyncJob};
pub use types::status::RemoteStatus;
pub use backend::{SyncBackend, SyncContext, SyncOutcome};
pub use collector::{run_collector, ChangeCollector};
pub use config::{load_config, AppConfig};
pub use endpoint::{EndpointMonitor, EndpointProbe, EndpointTracker, MonitorSettings, ProbeReport};
pub use events::StatusEvent;
pub use ledger::{JobLedger, RetentionPolicy};
pub use orchestrator::{Orchestrator, OrchestratorHandle, OrchestratorSettings, Scheduler};
pub use retry::RetryPolicy;
