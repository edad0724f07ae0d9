//! Deterministic scheduling state for sync jobs
//!
//! Each repository has a lane holding at most a head job (queued, running
//! or waiting for a retry) and one queued follow-up. Change-sets arriving
//! while a follow-up exists are merged into it, so no change is dropped and
//! a repository never has two jobs running.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::SyncOutcome;
use crate::error::{PartsyncError, SyncError};
use crate::events::StatusEvent;
use crate::ledger::JobLedger;
use crate::types::binding::RepositoryBinding;
use crate::types::change::ChangeSet;
use crate::types::endpoint::EndpointState;
use crate::types::ids::{JobId, RepositoryId};
use crate::types::job::{JobState, SyncJob};

use super::OrchestratorSettings;

/// A job moved to Running, with everything a worker needs
#[derive(Debug, Clone)]
pub struct Promotion {
    pub job_id: JobId,
    pub binding: RepositoryBinding,
    pub changes: ChangeSet,
    pub attempt: u32,
}

/// What happened to a job when its attempt finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    /// Failed; another attempt is due after the delay
    RetryAfter(Duration),
    /// Failed without automatic retry
    Failed,
    Abandoned,
}

/// Per-repository summary for status queries
#[derive(Debug, Clone, Serialize)]
pub struct LaneStatus {
    pub repository_id: RepositoryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<JobState>,
    pub follow_up: bool,
}

/// Snapshot of the scheduler's counters
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub paused: bool,
    pub running: usize,
    pub ready: usize,
    pub retry_pending: usize,
    pub repositories: Vec<LaneStatus>,
}

struct Lane {
    binding: RepositoryBinding,
    head: Option<JobId>,
    follow_up: Option<JobId>,
}

struct Tracked {
    seq: u64,
    job: SyncJob,
}

pub struct Scheduler {
    settings: OrchestratorSettings,
    ledger: Arc<JobLedger>,
    lanes: BTreeMap<RepositoryId, Lane>,
    /// Live (unsettled) jobs
    jobs: HashMap<JobId, Tracked>,
    /// Queued head jobs by arrival order
    ready: BTreeMap<u64, JobId>,
    running: HashSet<JobId>,
    paused: bool,
    next_seq: u64,
    outbox: Vec<StatusEvent>,
}

impl Scheduler {
    pub fn new(
        bindings: Vec<RepositoryBinding>,
        settings: OrchestratorSettings,
        ledger: Arc<JobLedger>,
    ) -> Self {
        let lanes = bindings
            .into_iter()
            .map(|binding| {
                (
                    binding.id.clone(),
                    Lane {
                        binding,
                        head: None,
                        follow_up: None,
                    },
                )
            })
            .collect();
        Self {
            settings,
            ledger,
            lanes,
            jobs: HashMap::new(),
            ready: BTreeMap::new(),
            running: HashSet::new(),
            paused: false,
            next_seq: 0,
            outbox: Vec::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Accept a change-set. Returns the jobs that were created or extended.
    pub fn submit(&mut self, changes: ChangeSet) -> Vec<JobId> {
        let mut touched = Vec::new();
        for (repository, set) in changes.partition() {
            if !self.lanes.contains_key(&repository) {
                warn!(repository = %repository, paths = set.len(), "change-set for unknown repository skipped");
                continue;
            }
            touched.push(self.enqueue(&repository, set));
        }
        touched
    }

    fn enqueue(&mut self, repository: &RepositoryId, set: ChangeSet) -> JobId {
        let (head, follow_up) = match self.lanes.get(repository) {
            Some(lane) => (lane.head, lane.follow_up),
            None => (None, None),
        };

        if let Some(id) = follow_up {
            if let Some(tracked) = self.jobs.get_mut(&id) {
                tracked.job.changes.merge(set);
                tracked.job.updated_at = Utc::now();
                debug!(repository = %repository, job = %id.short(), paths = tracked.job.changes.len(), "merged into pending job");
                self.ledger.record(&tracked.job);
                return id;
            }
        }

        let job = SyncJob::new(repository.clone(), set);
        let id = job.id;
        let seq = self.next_seq;
        self.next_seq += 1;
        info!(repository = %repository, job = %id.short(), paths = job.changes.len(), "job queued");
        self.ledger.record(&job);
        self.outbox.push(StatusEvent::job_updated(&job, false));
        self.jobs.insert(id, Tracked { seq, job });

        if let Some(lane) = self.lanes.get_mut(repository) {
            if head.is_none() {
                lane.head = Some(id);
                self.ready.insert(seq, id);
            } else {
                lane.follow_up = Some(id);
            }
        }
        id
    }

    /// Move ready jobs to Running while the gate is open and capacity remains
    pub fn promote(&mut self, endpoint: EndpointState) -> Vec<Promotion> {
        let mut promoted = Vec::new();
        if self.paused || !self.settings.gate.admits(endpoint) {
            return promoted;
        }

        while self.running.len() < self.settings.max_concurrent {
            let Some((_, id)) = self.ready.pop_first() else {
                break;
            };
            let Some(tracked) = self.jobs.get_mut(&id) else {
                continue;
            };
            let Some(lane) = self.lanes.get(&tracked.job.repository_id) else {
                continue;
            };

            tracked.job.transition(JobState::Running, None);
            tracked.job.attempt_count += 1;
            self.running.insert(id);
            self.ledger.record(&tracked.job);
            self.outbox.push(StatusEvent::job_updated(&tracked.job, false));
            info!(
                repository = %tracked.job.repository_id,
                job = %id.short(),
                attempt = tracked.job.attempt_count,
                endpoint = %endpoint,
                "job running"
            );

            promoted.push(Promotion {
                job_id: id,
                binding: lane.binding.clone(),
                changes: tracked.job.changes.clone(),
                attempt: tracked.job.attempt_count,
            });
        }
        promoted
    }

    /// Record the result of a running job's attempt
    pub fn complete(
        &mut self,
        job_id: JobId,
        result: Result<SyncOutcome, SyncError>,
    ) -> Result<Completion, PartsyncError> {
        if !self.running.remove(&job_id) {
            return Err(PartsyncError::NotFound(format!("running job {}", job_id)));
        }
        let tracked = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| PartsyncError::Internal(format!("job {} not tracked", job_id)))?;
        let repository = tracked.job.repository_id.clone();

        let completion = match result {
            Ok(outcome) => {
                tracked.job.transition(JobState::Succeeded, None);
                info!(
                    repository = %repository,
                    job = %job_id.short(),
                    revision = %outcome.revision,
                    applied = outcome.applied,
                    "job succeeded"
                );
                if let Some(lane) = self.lanes.get_mut(&repository) {
                    lane.binding.last_synced_revision = Some(outcome.revision);
                }
                Completion::Succeeded
            }
            Err(err) if err.is_retryable() => {
                let delay = self.settings.retry.delay(tracked.job.attempt_count);
                tracked.job.transition(JobState::Failed, Some(err.to_string()));
                tracked.job.next_attempt_at = chrono::Duration::from_std(delay)
                    .ok()
                    .map(|d| Utc::now() + d);
                warn!(
                    repository = %repository,
                    job = %job_id.short(),
                    attempt = tracked.job.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "job attempt failed"
                );
                Completion::RetryAfter(delay)
            }
            Err(SyncError::Cancelled) => {
                tracked.job.transition(JobState::Abandoned, Some(SyncError::Cancelled.to_string()));
                warn!(repository = %repository, job = %job_id.short(), "job abandoned after cancellation");
                Completion::Abandoned
            }
            Err(err) => {
                tracked.job.transition(JobState::Failed, Some(err.to_string()));
                warn!(repository = %repository, job = %job_id.short(), error = %err, "job failed");
                Completion::Failed
            }
        };

        let job = tracked.job.clone();
        self.ledger.record(&job);
        self.outbox
            .push(StatusEvent::job_updated(&job, job.is_failed_terminal()));

        if job.is_settled() {
            self.settle(&job);
        }
        Ok(completion)
    }

    /// A retry timer fired for `job_id`
    pub fn retry_due(&mut self, job_id: JobId) -> Option<Completion> {
        let tracked = self.jobs.get_mut(&job_id)?;
        if !tracked.job.is_retry_pending() {
            return None;
        }

        if !self.settings.retry.allows_retry(tracked.job.attempt_count) {
            tracked.job.transition(JobState::Abandoned, None);
            warn!(
                repository = %tracked.job.repository_id,
                job = %job_id.short(),
                attempts = tracked.job.attempt_count,
                "retry budget exhausted, job abandoned"
            );
            let job = tracked.job.clone();
            self.ledger.record(&job);
            self.outbox.push(StatusEvent::job_updated(&job, true));
            self.settle(&job);
            return Some(Completion::Abandoned);
        }

        tracked.job.transition(JobState::Queued, None);
        debug!(repository = %tracked.job.repository_id, job = %job_id.short(), "job re-queued for retry");
        self.ready.insert(tracked.seq, job_id);
        self.ledger.record(&tracked.job);
        self.outbox.push(StatusEvent::job_updated(&tracked.job, false));
        None
    }

    /// Manual retry: a fresh job carrying the last failed job's changes
    pub fn retry_repository(&mut self, repository: &RepositoryId) -> Result<JobId, PartsyncError> {
        if !self.lanes.contains_key(repository) {
            return Err(PartsyncError::NotFound(format!("repository '{}'", repository)));
        }
        let mut failed = self.ledger.latest_failed(repository).ok_or_else(|| {
            PartsyncError::NotFound(format!(
                "no failed job awaiting retry for repository '{}'",
                repository
            ))
        })?;
        info!(repository = %repository, previous = %failed.id.short(), "manual retry requested");
        let fresh = self.enqueue(repository, failed.changes.clone());

        // A failed job is retried at most once
        failed.retried_by = Some(fresh);
        self.ledger.record(&failed);
        Ok(fresh)
    }

    fn settle(&mut self, job: &SyncJob) {
        self.jobs.remove(&job.id);
        let Some(lane) = self.lanes.get_mut(&job.repository_id) else {
            return;
        };
        if lane.head != Some(job.id) {
            return;
        }
        lane.head = lane.follow_up.take();
        if let Some(next) = lane.head {
            if let Some(tracked) = self.jobs.get(&next) {
                self.ready.insert(tracked.seq, next);
            }
        }
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            info!("sync paused");
            self.outbox.push(StatusEvent::SyncPaused { paused: true });
        }
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            info!("sync resumed");
            self.outbox.push(StatusEvent::SyncPaused { paused: false });
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.running.contains(&job_id)
    }

    pub fn ready(&self) -> usize {
        self.ready.len()
    }

    pub fn job(&self, job_id: JobId) -> Option<&SyncJob> {
        self.jobs.get(&job_id).map(|t| &t.job)
    }

    pub fn binding(&self, repository: &RepositoryId) -> Option<&RepositoryBinding> {
        self.lanes.get(repository).map(|l| &l.binding)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            paused: self.paused,
            running: self.running.len(),
            ready: self.ready.len(),
            retry_pending: self.jobs.values().filter(|t| t.job.is_retry_pending()).count(),
            repositories: self
                .lanes
                .values()
                .map(|lane| LaneStatus {
                    repository_id: lane.binding.id.clone(),
                    last_synced_revision: lane.binding.last_synced_revision.clone(),
                    head: lane.head.and_then(|id| self.jobs.get(&id)).map(|t| t.job.state),
                    follow_up: lane.follow_up.is_some(),
                })
                .collect(),
        }
    }

    /// Drain events produced since the last call
    pub fn take_events(&mut self) -> Vec<StatusEvent> {
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::change::{ChangeEvent, ChangeKind};
    use std::path::PathBuf;

    fn scheduler(k: usize) -> Scheduler {
        let settings = OrchestratorSettings {
            max_concurrent: k,
            ..OrchestratorSettings::default()
        };
        Scheduler::new(
            vec![
                RepositoryBinding::new("r1", "/w/r1"),
                RepositoryBinding::new("r2", "/w/r2"),
            ],
            settings,
            Arc::new(JobLedger::default()),
        )
    }

    fn changes(repo: &str, file: &str) -> ChangeSet {
        vec![ChangeEvent {
            path: PathBuf::from(format!("/w/{}/{}", repo, file)),
            kind: ChangeKind::Modified,
            timestamp: Utc::now(),
            repository_id: RepositoryId::from(repo),
            renamed_from: None,
        }]
        .into()
    }

    #[test]
    fn test_unknown_repository_skipped() {
        let mut s = scheduler(4);
        assert!(s.submit(changes("nope", "a")).is_empty());
        assert_eq!(s.ready(), 0);
    }

    #[test]
    fn test_third_changeset_merges_into_follow_up() {
        let mut s = scheduler(4);
        let a = s.submit(changes("r1", "a"))[0];
        let b = s.submit(changes("r1", "b"))[0];
        let c = s.submit(changes("r1", "c"))[0];

        assert_ne!(a, b);
        assert_eq!(b, c);
        assert_eq!(s.job(b).unwrap().changes.len(), 2);
        assert_eq!(s.ready(), 1);
    }

    #[test]
    fn test_success_updates_binding_and_advances_lane() {
        let mut s = scheduler(4);
        let a = s.submit(changes("r1", "a"))[0];
        let b = s.submit(changes("r1", "b"))[0];

        let p = s.promote(EndpointState::Detected);
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].job_id, a);

        let done = s
            .complete(a, Ok(SyncOutcome { revision: "abc".into(), applied: true }))
            .unwrap();
        assert_eq!(done, Completion::Succeeded);
        assert_eq!(
            s.binding(&RepositoryId::from("r1")).unwrap().last_synced_revision.as_deref(),
            Some("abc")
        );

        let p = s.promote(EndpointState::Detected);
        assert_eq!(p[0].job_id, b);
        assert_eq!(p[0].binding.last_synced_revision.as_deref(), Some("abc"));
    }

    #[test]
    fn test_conflict_is_terminal_and_visible() {
        let mut s = scheduler(4);
        let a = s.submit(changes("r1", "a"))[0];
        s.promote(EndpointState::Reachable);
        s.take_events();

        let err = SyncError::Conflict { expected: "a".into(), actual: "b".into() };
        assert_eq!(s.complete(a, Err(err)).unwrap(), Completion::Failed);

        let events = s.take_events();
        assert!(matches!(
            events.last(),
            Some(StatusEvent::JobUpdated { state: JobState::Failed, user_visible: true, .. })
        ));
        assert!(s.job(a).is_none());
    }

    #[test]
    fn test_manual_retry_recreates_job() {
        let mut s = scheduler(4);
        let a = s.submit(changes("r1", "a"))[0];
        s.promote(EndpointState::Detected);
        s.complete(a, Err(SyncError::Configuration("no remote".into()))).unwrap();

        let fresh = s.retry_repository(&RepositoryId::from("r1")).unwrap();
        assert_ne!(fresh, a);
        assert_eq!(s.job(fresh).unwrap().attempt_count, 0);
        assert_eq!(s.job(fresh).unwrap().changes.len(), 1);

        let err = s.retry_repository(&RepositoryId::from("r2")).unwrap_err();
        assert!(matches!(err, PartsyncError::NotFound(_)));
    }

    #[test]
    fn test_failed_job_is_retried_once() {
        let mut s = scheduler(4);
        let a = s.submit(changes("r1", "a"))[0];
        s.promote(EndpointState::Detected);
        s.complete(a, Err(SyncError::Configuration("no remote".into()))).unwrap();

        let fresh = s.retry_repository(&RepositoryId::from("r1")).unwrap();
        assert_eq!(s.ledger.get(a).unwrap().retried_by, Some(fresh));
        s.promote(EndpointState::Detected);
        s.complete(fresh, Ok(SyncOutcome { revision: "r".into(), applied: true }))
            .unwrap();

        let err = s.retry_repository(&RepositoryId::from("r1")).unwrap_err();
        assert!(matches!(err, PartsyncError::NotFound(_)));
        assert_eq!(s.ready(), 0);
    }

    #[test]
    fn test_pause_blocks_promotion() {
        let mut s = scheduler(4);
        s.submit(changes("r1", "a"));
        s.pause();
        assert!(s.promote(EndpointState::Reachable).is_empty());
        s.resume();
        assert_eq!(s.promote(EndpointState::Reachable).len(), 1);
    }

    #[test]
    fn test_complete_unknown_job() {
        let mut s = scheduler(4);
        assert!(s.complete(JobId::generate(), Err(SyncError::Cancelled)).is_err());
    }
}
