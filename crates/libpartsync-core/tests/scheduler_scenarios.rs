//! Scheduling scenarios driven directly against the scheduler

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use libpartsync_core::orchestrator::{Completion, OrchestratorSettings, Scheduler};
use libpartsync_core::{
    ChangeEvent, ChangeKind, ChangeSet, EndpointState, JobLedger, JobState, RepositoryBinding,
    RepositoryId, StatusEvent, SyncError, SyncOutcome,
};

fn bindings(names: &[&str]) -> Vec<RepositoryBinding> {
    names
        .iter()
        .map(|n| RepositoryBinding::new(*n, format!("/work/{}", n)))
        .collect()
}

fn changes(repo: &str, file: &str) -> ChangeSet {
    vec![ChangeEvent {
        path: PathBuf::from(format!("/work/{}/{}", repo, file)),
        kind: ChangeKind::Modified,
        timestamp: Utc::now(),
        repository_id: RepositoryId::from(repo),
        renamed_from: None,
    }]
    .into()
}

fn ok(rev: &str) -> Result<SyncOutcome, SyncError> {
    Ok(SyncOutcome {
        revision: rev.to_string(),
        applied: true,
    })
}

#[test]
fn test_absent_endpoint_holds_jobs_then_promotes_one_per_repository() {
    let ledger = Arc::new(JobLedger::default());
    let mut s = Scheduler::new(bindings(&["r1"]), OrchestratorSettings::default(), Arc::clone(&ledger));

    let first = s.submit(changes("r1", "a.kicad_sym"))[0];
    let second = s.submit(changes("r1", "b.kicad_sym"))[0];
    assert_ne!(first, second);

    assert!(s.promote(EndpointState::Absent).is_empty());
    assert_eq!(ledger.get(first).unwrap().state, JobState::Queued);
    assert_eq!(ledger.get(second).unwrap().state, JobState::Queued);

    let promoted = s.promote(EndpointState::Detected);
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0].job_id, first);
    assert_eq!(ledger.get(second).unwrap().state, JobState::Queued);

    // Capacity is free, but the repository already has a running job
    assert!(s.promote(EndpointState::Detected).is_empty());

    s.complete(first, ok("r1-1")).unwrap();
    let promoted = s.promote(EndpointState::Detected);
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0].job_id, second);
}

#[test]
fn test_global_limit_holds_third_repository() {
    let settings = OrchestratorSettings {
        max_concurrent: 2,
        ..OrchestratorSettings::default()
    };
    let ledger = Arc::new(JobLedger::default());
    let mut s = Scheduler::new(bindings(&["a", "b", "c"]), settings, Arc::clone(&ledger));

    let mut all = ChangeSet::new();
    for repo in ["a", "b", "c"] {
        all.merge(changes(repo, "lib.kicad_sym"));
    }
    let jobs = s.submit(all);
    assert_eq!(jobs.len(), 3);

    let promoted = s.promote(EndpointState::Reachable);
    assert_eq!(promoted.len(), 2);
    assert_eq!(s.running(), 2);

    let waiting: Vec<_> = jobs
        .iter()
        .filter(|id| ledger.get(**id).unwrap().state == JobState::Queued)
        .collect();
    assert_eq!(waiting.len(), 1);

    // Still two running: nothing moves until one finishes
    assert!(s.promote(EndpointState::Reachable).is_empty());

    s.complete(promoted[0].job_id, ok("rev")).unwrap();
    let next = s.promote(EndpointState::Reachable);
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].job_id, *waiting[0]);
}

#[test]
fn test_five_transient_failures_then_abandoned() {
    let ledger = Arc::new(JobLedger::default());
    let mut s = Scheduler::new(bindings(&["r1"]), OrchestratorSettings::default(), Arc::clone(&ledger));
    let job = s.submit(changes("r1", "a"))[0];

    let mut delays = Vec::new();
    for attempt in 1..=5u32 {
        let promoted = s.promote(EndpointState::Detected);
        assert_eq!(promoted.len(), 1, "attempt {} should run", attempt);
        assert_eq!(promoted[0].attempt, attempt);

        let completion = s
            .complete(job, Err(SyncError::TransientIo("connection reset".into())))
            .unwrap();
        let Completion::RetryAfter(delay) = completion else {
            panic!("expected a retry delay, got {:?}", completion);
        };
        delays.push(delay);
        assert_eq!(ledger.get(job).unwrap().state, JobState::Failed);

        let due = s.retry_due(job);
        if attempt < 5 {
            assert_eq!(due, None);
            assert_eq!(ledger.get(job).unwrap().state, JobState::Queued);
        } else {
            assert_eq!(due, Some(Completion::Abandoned));
        }
    }

    assert_eq!(
        delays,
        [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec()
    );
    let stored = ledger.get(job).unwrap();
    assert_eq!(stored.state, JobState::Abandoned);
    assert_eq!(stored.attempt_count, 5);
    assert!(s.promote(EndpointState::Detected).is_empty());

    let transitions: Vec<JobState> = s
        .take_events()
        .into_iter()
        .filter_map(|e| match e {
            StatusEvent::JobUpdated { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    let running = transitions.iter().filter(|s| **s == JobState::Running).count();
    let failed = transitions.iter().filter(|s| **s == JobState::Failed).count();
    assert_eq!(running, 5);
    assert_eq!(failed, 5);
    assert_eq!(transitions.last(), Some(&JobState::Abandoned));
}

#[test]
fn test_concurrent_submission_never_runs_two_jobs_per_repository() {
    let repos = ["r1", "r2", "r3"];
    let settings = OrchestratorSettings {
        max_concurrent: 8,
        ..OrchestratorSettings::default()
    };
    let scheduler = Arc::new(Mutex::new(Scheduler::new(
        bindings(&repos),
        settings,
        Arc::new(JobLedger::default()),
    )));
    let running: Arc<Mutex<HashSet<RepositoryId>>> = Arc::new(Mutex::new(HashSet::new()));

    let num_threads = 6;
    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let scheduler = Arc::clone(&scheduler);
            let running = Arc::clone(&running);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..50 {
                    let repo = repos[(t + i) % repos.len()];
                    let mut s = scheduler.lock().unwrap();
                    s.submit(changes(repo, &format!("{}-{}", t, i)));

                    for p in s.promote(EndpointState::Detected) {
                        let fresh = running.lock().unwrap().insert(p.binding.id.clone());
                        assert!(fresh, "two running jobs for {}", p.binding.id);

                        // Finish every other job immediately
                        if i % 2 == 0 {
                            running.lock().unwrap().remove(&p.binding.id);
                            s.complete(p.job_id, ok("rev")).unwrap();
                        }
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(scheduler.lock().unwrap().running() <= repos.len());
}
