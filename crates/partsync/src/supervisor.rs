//! Supervisor: wires the pipeline together and owns its lifetime
//!
//! watcher -> collector -> orchestrator <- endpoint monitor, plus the
//! remote status poller and the stdin/stdout control channel. One
//! broadcast shutdown signal stops every task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use libpartsync_core::{
    run_collector, AppConfig, ChangeCollector, EndpointMonitor, JobLedger, Orchestrator,
    PartsyncError, StatusEvent,
};
use libpartsync_git::GitBackend;
use libpartsync_ipc::messages::OutboundMessage;
use libpartsync_ipc::{InstanceGuard, InstanceLock, SystemProbe};
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::control;
use crate::poller::RemoteStatusPoller;
use crate::watcher::FsWatcher;

const RAW_EVENT_CAPACITY: usize = 1024;
const CHANGESET_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;
const OUTPUT_CAPACITY: usize = 64;
/// Time allowed for auxiliary tasks after the orchestrator has stopped
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Supervisor {
    config: AppConfig,
    config_path: PathBuf,
    state_dir: PathBuf,
}

impl Supervisor {
    pub fn new(config: AppConfig, config_path: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            config,
            config_path,
            state_dir,
        }
    }

    pub async fn run(self) -> Result<(), PartsyncError> {
        // Held until this function returns
        let guard = InstanceGuard::try_acquire(&self.state_dir)?;
        let mut lock = InstanceLock::acquire(&guard, self.config_path.display().to_string())?;
        info!(
            pid = lock.pid,
            state_dir = %self.state_dir.display(),
            repositories = self.config.repositories.len(),
            "partsync starting"
        );

        let result = self.run_pipeline(&mut lock).await;

        if let Err(e) = InstanceLock::release(&self.state_dir) {
            warn!(error = %e, "failed to release instance lock");
        }
        info!("partsync stopped");
        result
    }

    async fn run_pipeline(&self, lock: &mut InstanceLock) -> Result<(), PartsyncError> {
        let config = &self.config;
        let bindings = config.bindings();
        let settings = config.orchestrator_settings();

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (events_tx, _) = broadcast::channel::<StatusEvent>(EVENT_CAPACITY);
        let mut aux: Vec<JoinHandle<()>> = Vec::new();

        // Control output first so no event is missed
        let (out_tx, out_rx) = mpsc::channel::<OutboundMessage>(OUTPUT_CAPACITY);
        let writer = tokio::spawn(control::write_output(
            tokio::io::stdout(),
            out_rx,
            events_tx.subscribe(),
        ));

        let (raw_tx, raw_rx) = mpsc::channel(RAW_EVENT_CAPACITY);
        let watcher = FsWatcher::start(&bindings, raw_tx)?;
        info!(roots = watcher.roots().len(), "filesystem watcher started");

        let (changes_tx, changes_rx) = mpsc::channel(CHANGESET_CAPACITY);
        aux.push(tokio::spawn(run_collector(
            ChangeCollector::new(&bindings),
            raw_rx,
            config.debounce(),
            changes_tx,
            shutdown_tx.subscribe(),
        )));

        let probe = Arc::new(SystemProbe::new(
            config.endpoint.ipc_path.clone(),
            &config.endpoint.process_names,
        ));
        let monitor = EndpointMonitor::new(probe, config.monitor_settings(), events_tx.clone());
        let endpoint_rx = monitor.subscribe();
        aux.push(tokio::spawn(monitor.run(shutdown_tx.subscribe())));

        let ledger = Arc::new(JobLedger::new(config.retention_policy()));
        let (orchestrator, handle) = Orchestrator::new(
            bindings.clone(),
            settings,
            Arc::new(GitBackend::new()),
            ledger,
            events_tx.clone(),
            changes_rx,
            endpoint_rx.clone(),
        );
        let orchestrator_task = tokio::spawn(orchestrator.run(shutdown_tx.subscribe()));

        if config.status.enabled {
            let poller = RemoteStatusPoller::new(
                bindings,
                config.status_poll_interval(),
                settings.gate,
                endpoint_rx,
                events_tx.clone(),
            )
            .with_orchestrator(handle.clone());
            aux.push(tokio::spawn(poller.run(shutdown_tx.subscribe())));
        }

        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        aux.push(tokio::spawn(control::serve_requests(
            BufReader::new(tokio::io::stdin()),
            handle,
            out_tx,
            stop_tx,
            shutdown_tx.subscribe(),
        )));

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis((lock.lease_ms / 3).max(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let signal = shutdown_signal();
        tokio::pin!(signal);

        let mut outcome = Ok(());
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("received shutdown signal");
                    break;
                }
                Some(()) = stop_rx.recv() => break,
                _ = heartbeat.tick() => {
                    if let Err(e) = lock.heartbeat(&self.state_dir) {
                        error!(error = %e, "lost instance lock, stopping");
                        outcome = Err(e.into());
                        break;
                    }
                }
            }
        }

        let _ = shutdown_tx.send(());
        drop(watcher);

        if let Err(e) = orchestrator_task.await {
            error!(error = %e, "orchestrator task failed");
        }
        for task in aux {
            match tokio::time::timeout(TASK_STOP_TIMEOUT, task).await {
                Ok(Err(e)) => error!(error = %e, "task failed"),
                Err(_) => warn!("task did not stop in time"),
                Ok(Ok(())) => {}
            }
        }

        // Every event sender is gone now; the writer drains and exits
        drop(events_tx);
        if tokio::time::timeout(TASK_STOP_TIMEOUT, writer).await.is_err() {
            warn!("control output did not drain in time");
        }
        outcome
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
