//! Executes one job attempt against the backend

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::backend::{SyncBackend, SyncContext, SyncOutcome};
use crate::error::SyncError;
use crate::types::ids::JobId;

use super::scheduler::Promotion;

/// Run the backend on the blocking pool under the per-attempt timeout.
///
/// On timeout the context is cancelled and the attempt is awaited until the
/// backend reaches its next checkpoint, so the working tree is never shared
/// between two attempts.
pub async fn execute<B: SyncBackend>(
    backend: Arc<B>,
    promotion: Promotion,
    ctx: SyncContext,
    timeout: Duration,
) -> (JobId, Result<SyncOutcome, SyncError>) {
    let job_id = promotion.job_id;
    let worker_ctx = ctx.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        backend.sync(&promotion.binding, &promotion.changes, &worker_ctx)
    });

    let result = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            error!(job = %job_id.short(), error = %join_err, "sync task panicked");
            Err(SyncError::TransientIo(format!("sync task failed: {}", join_err)))
        }
        Err(_) => {
            warn!(job = %job_id.short(), timeout_ms = timeout.as_millis() as u64, "attempt timed out, cancelling");
            ctx.cancel();
            let started = Instant::now();
            let late = task.await;
            debug!(job = %job_id.short(), waited_ms = started.elapsed().as_millis() as u64, "backend reached checkpoint");
            match late {
                // Finished its last unit before noticing the cancellation
                Ok(Ok(outcome)) => Ok(outcome),
                _ => Err(SyncError::Timeout(timeout)),
            }
        }
    };
    (job_id, result)
}
