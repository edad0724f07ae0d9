//! In-memory record of sync job transitions

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::PartsyncError;
use crate::types::ids::{JobId, RepositoryId};
use crate::types::job::{JobState, SyncJob};

/// How long settled jobs are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: chrono::Duration,
    pub max_entries_per_repository: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: chrono::Duration::days(7),
            max_entries_per_repository: 1_000,
        }
    }
}

/// Point-in-time copy of the ledger contents
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub jobs: Vec<SyncJob>,
}

struct Entry {
    seq: u64,
    job: SyncJob,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    entries: HashMap<JobId, Entry>,
}

/// Append-and-update log of job snapshots.
///
/// Internally serialised; share it behind an `Arc`.
pub struct JobLedger {
    retention: RetentionPolicy,
    inner: Mutex<Inner>,
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

impl JobLedger {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            retention,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a job or refresh its stored snapshot
    pub fn record(&self, job: &SyncJob) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(&job.id) {
            entry.job = job.clone();
            return;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            job.id,
            Entry {
                seq,
                job: job.clone(),
            },
        );
    }

    /// Apply a state transition to a recorded job
    pub fn update(
        &self,
        job_id: JobId,
        state: JobState,
        error: Option<String>,
    ) -> Result<SyncJob, PartsyncError> {
        let mut inner = self.lock();
        let entry = inner
            .entries
            .get_mut(&job_id)
            .ok_or_else(|| PartsyncError::NotFound(format!("job {}", job_id)))?;
        entry.job.transition(state, error);
        Ok(entry.job.clone())
    }

    pub fn get(&self, job_id: JobId) -> Option<SyncJob> {
        self.lock().entries.get(&job_id).map(|e| e.job.clone())
    }

    /// Jobs for one repository, most recently created first
    pub fn query(&self, repository: &RepositoryId) -> Vec<SyncJob> {
        let inner = self.lock();
        let mut entries: Vec<&Entry> = inner
            .entries
            .values()
            .filter(|e| &e.job.repository_id == repository)
            .collect();
        entries.sort_by(|a, b| {
            (b.job.created_at, b.seq).cmp(&(a.job.created_at, a.seq))
        });
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    /// Most recent job for the repository that ended without success and
    /// has not been retried yet
    pub fn latest_failed(&self, repository: &RepositoryId) -> Option<SyncJob> {
        self.query(repository)
            .into_iter()
            .find(|job| job.is_failed_terminal() && job.retried_by.is_none())
    }

    /// All jobs, oldest first
    pub fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.lock();
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by_key(|e| (e.job.created_at, e.seq));
        LedgerSnapshot {
            taken_at: Utc::now(),
            jobs: entries.into_iter().map(|e| e.job.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drop settled jobs past the retention horizon or beyond the
    /// per-repository cap. Returns the number of removed jobs.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        // No age horizon when it falls before the representable range
        let horizon = now.checked_sub_signed(self.retention.max_age);
        let mut inner = self.lock();

        let mut settled: BTreeMap<RepositoryId, Vec<(DateTime<Utc>, u64, JobId)>> =
            BTreeMap::new();
        for entry in inner.entries.values() {
            if entry.job.is_settled() {
                settled
                    .entry(entry.job.repository_id.clone())
                    .or_default()
                    .push((entry.job.created_at, entry.seq, entry.job.id));
            }
        }

        let mut doomed = Vec::new();
        for (_, mut jobs) in settled {
            // Newest first so the cap keeps the most recent
            jobs.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
            for (rank, (created_at, _, id)) in jobs.into_iter().enumerate() {
                if horizon.is_some_and(|h| created_at < h) || rank >= self.retention.max_entries_per_repository {
                    doomed.push(id);
                }
            }
        }

        for id in &doomed {
            inner.entries.remove(id);
        }
        if !doomed.is_empty() {
            debug!(removed = doomed.len(), "pruned job ledger");
        }
        doomed.len()
    }
}
