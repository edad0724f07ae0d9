//! Contract between the orchestrator and whatever performs a sync

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::SyncError;
use crate::types::binding::RepositoryBinding;
use crate::types::change::ChangeSet;

/// Result of one successful sync attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Revision the remote now holds for the binding
    pub revision: String,
    /// False when nothing had to be done
    pub applied: bool,
}

/// Per-attempt execution context handed to a backend
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub attempt: u32,
    pub deadline: Instant,
    cancel: Arc<AtomicBool>,
}

impl SyncContext {
    pub fn new(attempt: u32, deadline: Instant) -> Self {
        Self {
            attempt,
            deadline,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask the backend to stop at its next checkpoint
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Call between atomic units of work. Errors once cancelled.
    pub fn checkpoint(&self) -> Result<(), SyncError> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Performs the actual sync of a change-set to a binding's remote.
///
/// Runs on the blocking pool. Implementations must be idempotent: when
/// `binding.last_synced_revision` already reflects the working tree they
/// return `applied = false` without contacting the remote.
pub trait SyncBackend: Send + Sync + 'static {
    fn sync(
        &self,
        binding: &RepositoryBinding,
        changes: &ChangeSet,
        ctx: &SyncContext,
    ) -> Result<SyncOutcome, SyncError>;
}
