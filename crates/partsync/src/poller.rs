//! Periodic remote status checks
//!
//! Polls ahead/behind for every binding, only while the endpoint gate is
//! open, and publishes the results as status events. Repositories with a
//! running sync job are skipped for that round so the status fetch does not
//! contend with the job for the repository's ref locks.

use std::collections::HashSet;
use std::time::Duration;

use libpartsync_core::orchestrator::OrchestratorHandle;
use libpartsync_core::{
    EndpointState, JobState, RemoteStatus, RepositoryBinding, RepositoryId, StatusEvent, SyncGate,
};
use libpartsync_git::check_remote_status;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

pub struct RemoteStatusPoller {
    bindings: Vec<RepositoryBinding>,
    interval: Duration,
    gate: SyncGate,
    endpoint_rx: watch::Receiver<EndpointState>,
    events: broadcast::Sender<StatusEvent>,
    orchestrator: Option<OrchestratorHandle>,
}

impl RemoteStatusPoller {
    pub fn new(
        bindings: Vec<RepositoryBinding>,
        interval: Duration,
        gate: SyncGate,
        endpoint_rx: watch::Receiver<EndpointState>,
        events: broadcast::Sender<StatusEvent>,
    ) -> Self {
        Self {
            bindings,
            interval,
            gate,
            endpoint_rx,
            events,
            orchestrator: None,
        }
    }

    /// Skip repositories the orchestrator reports as running
    pub fn with_orchestrator(mut self, handle: OrchestratorHandle) -> Self {
        self.orchestrator = Some(handle);
        self
    }

    async fn busy_repositories(&self) -> HashSet<RepositoryId> {
        let Some(handle) = &self.orchestrator else {
            return HashSet::new();
        };
        match handle.status().await {
            Ok(status) => status
                .scheduler
                .repositories
                .into_iter()
                .filter(|lane| lane.head == Some(JobState::Running))
                .map(|lane| lane.repository_id)
                .collect(),
            Err(e) => {
                debug!(error = %e, "orchestrator status unavailable");
                HashSet::new()
            }
        }
    }

    fn gate_open(&self) -> bool {
        self.gate.admits(*self.endpoint_rx.borrow())
    }

    /// Check every binding once on the blocking pool
    pub async fn poll_all(&self) {
        let busy = self.busy_repositories().await;
        for binding in &self.bindings {
            if busy.contains(&binding.id) {
                debug!(repository = %binding.id, "sync job running, status check skipped");
                continue;
            }
            let b = binding.clone();
            let result = tokio::task::spawn_blocking(move || {
                check_remote_status(&b.local_path, &b.remote, b.branch.as_deref())
            })
            .await;

            let status = match result {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    warn!(repository = %binding.id, error = %e, "remote status check failed");
                    RemoteStatus::Unknown
                }
                Err(e) => {
                    warn!(repository = %binding.id, error = %e, "remote status task failed");
                    RemoteStatus::Unknown
                }
            };
            debug!(repository = %binding.id, %status, "remote status");
            let _ = self.events.send(StatusEvent::RemoteStatus {
                repository_id: binding.id.clone(),
                status,
            });
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "remote status poller started");

        loop {
            if !self.gate_open() {
                tokio::select! {
                    changed = self.endpoint_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = shutdown.recv() => break,
                }
            }

            tokio::select! {
                _ = self.poll_all() => {}
                _ = shutdown.recv() => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => break,
            }
        }
        info!("remote status poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use libpartsync_core::{
        ChangeEvent, ChangeKind, ChangeSet, JobLedger, Orchestrator, OrchestratorSettings,
        RawChange, SyncBackend, SyncContext, SyncError, SyncOutcome,
    };
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_waits_for_open_gate() {
        let (endpoint_tx, endpoint_rx) = watch::channel(EndpointState::Absent);
        let (events_tx, mut events_rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let poller = RemoteStatusPoller::new(
            vec![RepositoryBinding::new("footprints", "/nonexistent/footprints")],
            Duration::from_secs(150),
            SyncGate::RequireDetected,
            endpoint_rx,
            events_tx,
        );
        let task = tokio::spawn(poller.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events_rx.try_recv().is_err());

        endpoint_tx.send(EndpointState::Detected).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            StatusEvent::RemoteStatus {
                repository_id: "footprints".into(),
                status: RemoteStatus::Unknown,
            }
        );

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    struct HeldBackend;

    impl SyncBackend for HeldBackend {
        fn sync(
            &self,
            _binding: &RepositoryBinding,
            _changes: &ChangeSet,
            ctx: &SyncContext,
        ) -> Result<SyncOutcome, SyncError> {
            loop {
                ctx.checkpoint()?;
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    #[tokio::test]
    async fn test_skips_repository_with_running_job() {
        let bindings = vec![
            RepositoryBinding::new("symbols", "/nonexistent/symbols"),
            RepositoryBinding::new("footprints", "/nonexistent/footprints"),
        ];
        let (changes_tx, changes_rx) = mpsc::channel(4);
        let (_endpoint_tx, endpoint_rx) = watch::channel(EndpointState::Detected);
        let (events_tx, mut events_rx) = broadcast::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);
        let (orchestrator, handle) = Orchestrator::new(
            bindings.clone(),
            OrchestratorSettings {
                shutdown_grace: Duration::from_millis(50),
                ..OrchestratorSettings::default()
            },
            Arc::new(HeldBackend),
            Arc::new(JobLedger::default()),
            events_tx.clone(),
            changes_rx,
            endpoint_rx.clone(),
        );
        let task = tokio::spawn(orchestrator.run(shutdown_tx.subscribe()));

        let changes: ChangeSet = vec![ChangeEvent::from_raw(
            RawChange::new("/nonexistent/symbols/a.kicad_sym", ChangeKind::Modified),
            RepositoryId::from("symbols"),
        )]
        .into();
        changes_tx.send(changes).await.unwrap();
        loop {
            let status = handle.status().await.unwrap();
            if status.scheduler.running == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let poller = RemoteStatusPoller::new(
            bindings,
            Duration::from_secs(150),
            SyncGate::RequireDetected,
            endpoint_rx,
            events_tx,
        )
        .with_orchestrator(handle);
        poller.poll_all().await;

        let mut polled = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            if let StatusEvent::RemoteStatus { repository_id, .. } = event {
                polled.push(repository_id);
            }
        }
        assert_eq!(polled, vec![RepositoryId::from("footprints")]);

        drop(changes_tx);
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
