//! Sync orchestrator
//!
//! A single control loop owns the [`Scheduler`]. It consumes change-sets
//! from the collector, endpoint transitions from the monitor, user intents
//! and worker results, and is the only place job state changes.

pub mod scheduler;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::backend::{SyncBackend, SyncContext, SyncOutcome};
use crate::error::{PartsyncError, SyncError};
use crate::events::StatusEvent;
use crate::ledger::JobLedger;
use crate::retry::RetryPolicy;
use crate::types::binding::RepositoryBinding;
use crate::types::change::ChangeSet;
use crate::types::endpoint::{EndpointState, SyncGate};
use crate::types::ids::{JobId, RepositoryId};

pub use scheduler::{Completion, LaneStatus, Promotion, Scheduler, SchedulerStatus};

const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Limits and timing for job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// System-wide cap on Running jobs
    pub max_concurrent: usize,
    pub gate: SyncGate,
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            gate: SyncGate::default(),
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// User requests delivered to the control loop
#[derive(Debug)]
pub enum Intent {
    Retry {
        repository: RepositoryId,
        reply: oneshot::Sender<Result<JobId, PartsyncError>>,
    },
    Pause,
    Resume,
    Status {
        reply: oneshot::Sender<OrchestratorStatus>,
    },
}

/// Status reported to control clients
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub endpoint: EndpointState,
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
}

/// Cloneable sender side for intents
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    intents: mpsc::Sender<Intent>,
}

impl OrchestratorHandle {
    pub async fn retry(&self, repository: RepositoryId) -> Result<JobId, PartsyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Intent::Retry { repository, reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn pause(&self) -> Result<(), PartsyncError> {
        self.send(Intent::Pause).await
    }

    pub async fn resume(&self) -> Result<(), PartsyncError> {
        self.send(Intent::Resume).await
    }

    pub async fn status(&self) -> Result<OrchestratorStatus, PartsyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Intent::Status { reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    async fn send(&self, intent: Intent) -> Result<(), PartsyncError> {
        self.intents.send(intent).await.map_err(|_| stopped())
    }
}

fn stopped() -> PartsyncError {
    PartsyncError::Internal("orchestrator is not running".to_string())
}

type AttemptResult = (JobId, Result<SyncOutcome, SyncError>);

/// The control loop
pub struct Orchestrator<B: SyncBackend> {
    scheduler: Scheduler,
    backend: Arc<B>,
    ledger: Arc<JobLedger>,
    events: broadcast::Sender<StatusEvent>,
    changes_rx: mpsc::Receiver<ChangeSet>,
    endpoint_rx: watch::Receiver<EndpointState>,
    intents_rx: mpsc::Receiver<Intent>,
    workers: JoinSet<AttemptResult>,
    contexts: HashMap<JobId, SyncContext>,
    timers: JoinSet<JobId>,
}

impl<B: SyncBackend> Orchestrator<B> {
    pub fn new(
        bindings: Vec<RepositoryBinding>,
        settings: OrchestratorSettings,
        backend: Arc<B>,
        ledger: Arc<JobLedger>,
        events: broadcast::Sender<StatusEvent>,
        changes_rx: mpsc::Receiver<ChangeSet>,
        endpoint_rx: watch::Receiver<EndpointState>,
    ) -> (Self, OrchestratorHandle) {
        let (intents_tx, intents_rx) = mpsc::channel(32);
        let orchestrator = Self {
            scheduler: Scheduler::new(bindings, settings, Arc::clone(&ledger)),
            backend,
            ledger,
            events,
            changes_rx,
            endpoint_rx,
            intents_rx,
            workers: JoinSet::new(),
            contexts: HashMap::new(),
            timers: JoinSet::new(),
        };
        (orchestrator, OrchestratorHandle { intents: intents_tx })
    }

    fn endpoint(&self) -> EndpointState {
        *self.endpoint_rx.borrow()
    }

    /// Promote whatever is eligible, then publish pending events
    fn dispatch(&mut self) {
        let endpoint = self.endpoint();
        let settings = *self.scheduler.settings();
        for promotion in self.scheduler.promote(endpoint) {
            let deadline = Instant::now() + settings.attempt_timeout;
            let ctx = SyncContext::new(promotion.attempt, deadline);
            self.contexts.insert(promotion.job_id, ctx.clone());
            self.workers.spawn(worker::execute(
                Arc::clone(&self.backend),
                promotion,
                ctx,
                settings.attempt_timeout,
            ));
        }
        self.publish();
    }

    fn publish(&mut self) {
        for event in self.scheduler.take_events() {
            let _ = self.events.send(event);
        }
    }

    fn on_attempt_done(&mut self, joined: Result<AttemptResult, JoinError>) {
        let (job_id, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "sync worker task failed");
                return;
            }
        };
        self.contexts.remove(&job_id);

        match self.scheduler.complete(job_id, result) {
            Ok(Completion::RetryAfter(delay)) => {
                self.timers.spawn(async move {
                    tokio::time::sleep(delay).await;
                    job_id
                });
            }
            Ok(_) => {}
            Err(e) => warn!(job = %job_id.short(), error = %e, "completion for unknown job"),
        }
    }

    fn on_retry_due(&mut self, joined: Result<JobId, JoinError>) {
        match joined {
            Ok(job_id) => {
                self.scheduler.retry_due(job_id);
            }
            Err(e) => error!(error = %e, "retry timer failed"),
        }
    }

    fn on_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Retry { repository, reply } => {
                let result = self.scheduler.retry_repository(&repository);
                if let Err(e) = &result {
                    debug!(repository = %repository, error = %e, "manual retry rejected");
                }
                let _ = reply.send(result);
            }
            Intent::Pause => self.scheduler.pause(),
            Intent::Resume => self.scheduler.resume(),
            Intent::Status { reply } => {
                let _ = reply.send(OrchestratorStatus {
                    endpoint: self.endpoint(),
                    scheduler: self.scheduler.status(),
                });
            }
        }
    }

    /// Run until shutdown, then wind down running jobs
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let settings = *self.scheduler.settings();
        info!(
            max_concurrent = settings.max_concurrent,
            attempt_timeout_ms = settings.attempt_timeout.as_millis() as u64,
            "orchestrator started"
        );

        let mut changes_open = true;
        let mut endpoint_open = true;
        let mut intents_open = true;
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.dispatch();

            tokio::select! {
                set = self.changes_rx.recv(), if changes_open => match set {
                    Some(set) => {
                        self.scheduler.submit(set);
                    }
                    None => {
                        debug!("change-set stream closed");
                        changes_open = false;
                    }
                },
                changed = self.endpoint_rx.changed(), if endpoint_open => {
                    if changed.is_err() {
                        debug!("endpoint monitor gone");
                        endpoint_open = false;
                    }
                }
                intent = self.intents_rx.recv(), if intents_open => match intent {
                    Some(intent) => self.on_intent(intent),
                    None => intents_open = false,
                },
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    self.on_attempt_done(joined);
                }
                Some(joined) = self.timers.join_next(), if !self.timers.is_empty() => {
                    self.on_retry_due(joined);
                }
                _ = prune.tick() => {
                    self.ledger.prune(Utc::now());
                }
                _ = shutdown.recv() => break,
            }
        }

        self.wind_down(settings.shutdown_grace, changes_open).await;
    }

    /// Stop promoting and give running jobs the grace period, then cancel
    /// them. Jobs interrupted by the cancellation end up Abandoned.
    ///
    /// Change-sets still arriving from the collector (its forced flush) are
    /// recorded as Queued until the stream closes or the grace period ends.
    async fn wind_down(&mut self, grace: Duration, mut changes_open: bool) {
        self.timers.abort_all();
        if !self.workers.is_empty() {
            info!(running = self.workers.len(), grace_ms = grace.as_millis() as u64, "waiting for running jobs");
        }

        let deadline = tokio::time::Instant::now() + grace;
        while changes_open || !self.workers.is_empty() {
            tokio::select! {
                set = self.changes_rx.recv(), if changes_open => match set {
                    Some(set) => {
                        let jobs = self.scheduler.submit(set);
                        debug!(jobs = jobs.len(), "change-set received during shutdown");
                    }
                    None => changes_open = false,
                },
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    self.on_attempt_done(joined);
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        if changes_open {
            // Anything sent after this point is dropped with the receiver
            self.changes_rx.close();
            while let Ok(set) = self.changes_rx.try_recv() {
                self.scheduler.submit(set);
            }
            warn!("change-set stream still open after grace period");
        }

        if !self.workers.is_empty() {
            warn!(running = self.workers.len(), "grace period elapsed, cancelling running jobs");
            for ctx in self.contexts.values() {
                ctx.cancel();
            }
            while let Some(joined) = self.workers.join_next().await {
                let joined = joined.map(|(job_id, result)| {
                    // Anything short of success after cancellation is an interruption
                    (job_id, result.map_err(|_| SyncError::Cancelled))
                });
                self.on_attempt_done(joined);
            }
        }
        // Retries scheduled while winding down never fire
        self.timers.abort_all();

        let status = self.scheduler.status();
        let queued = status.ready + status.repositories.iter().filter(|l| l.follow_up).count();
        if queued > 0 || status.retry_pending > 0 {
            warn!(queued, retry_pending = status.retry_pending, "jobs left unsynced at shutdown");
        }
        self.publish();
        info!("orchestrator stopped");
    }
}
