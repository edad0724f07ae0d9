//! Endpoint monitor: tracks whether the target application is running
//!
//! Probing is delegated to an [`EndpointProbe`]; the pure
//! [`EndpointTracker`] turns probe results into [`EndpointState`]
//! transitions, and [`EndpointMonitor`] drives it on a fixed cadence and
//! publishes the result as the single writer of a `watch` cell.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::ProbeError;
use crate::events::StatusEvent;
use crate::types::endpoint::EndpointState;

/// Detection strategies, tried IPC first with process enumeration as fallback
pub trait EndpointProbe: Send + Sync + 'static {
    /// Attempt the IPC handshake. `None` when no IPC surface is configured.
    fn probe_ipc(&self) -> Option<Result<bool, ProbeError>>;

    /// Look for the application among running processes
    fn probe_process(&self) -> Result<bool, ProbeError>;
}

/// Outcome of one liveness check
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeReport {
    pub ipc: Option<Result<bool, ProbeError>>,
    pub process: Option<Result<bool, ProbeError>>,
}

impl ProbeReport {
    pub fn handshake(&self) -> bool {
        matches!(self.ipc, Some(Ok(true)))
    }

    pub fn process_found(&self) -> bool {
        matches!(self.process, Some(Ok(true)))
    }

    pub fn ipc_configured(&self) -> bool {
        self.ipc.is_some()
    }

    /// Found by at least one strategy
    pub fn present(&self) -> bool {
        self.handshake() || self.process_found()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ProbeError> {
        [self.ipc.as_ref(), self.process.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|r| r.as_ref().err())
    }
}

/// Endpoint state machine
#[derive(Debug, Clone)]
pub struct EndpointTracker {
    state: EndpointState,
    consecutive_failures: u32,
    failure_threshold: u32,
}

impl EndpointTracker {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            state: EndpointState::Unknown,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Feed one check result. Returns `(from, to)` when the state changed.
    pub fn observe(&mut self, report: &ProbeReport) -> Option<(EndpointState, EndpointState)> {
        let from = self.state;
        let to = if report.present() {
            self.consecutive_failures = 0;
            match from {
                EndpointState::Unknown | EndpointState::Absent | EndpointState::Lost => {
                    EndpointState::Detected
                }
                EndpointState::Detected if report.handshake() => EndpointState::Reachable,
                EndpointState::Detected => EndpointState::Detected,
                EndpointState::Reachable if report.handshake() || !report.ipc_configured() => {
                    EndpointState::Reachable
                }
                EndpointState::Reachable => EndpointState::Detected,
            }
        } else {
            match from {
                EndpointState::Detected | EndpointState::Reachable => {
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= self.failure_threshold {
                        self.consecutive_failures = 0;
                        EndpointState::Lost
                    } else {
                        from
                    }
                }
                EndpointState::Unknown | EndpointState::Absent | EndpointState::Lost => {
                    EndpointState::Absent
                }
            }
        };
        self.state = to;
        (from != to).then_some((from, to))
    }

    /// Forget everything, as on monitor restart
    pub fn restart(&mut self) -> Option<(EndpointState, EndpointState)> {
        let from = self.state;
        self.state = EndpointState::Unknown;
        self.consecutive_failures = 0;
        (from != EndpointState::Unknown).then_some((from, EndpointState::Unknown))
    }
}

/// Monitor cadence and tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub failure_threshold: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(1),
            failure_threshold: 3,
        }
    }
}

async fn run_probe<T, F>(timeout: Duration, f: F) -> Result<T, ProbeError>
where
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ProbeError::Io(join_err.to_string())),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Run both strategies once, each on the blocking pool under `timeout`
pub async fn check_endpoint<P: EndpointProbe>(probe: &Arc<P>, timeout: Duration) -> ProbeReport {
    let p = Arc::clone(probe);
    let ipc = match run_probe(timeout, move || Ok(p.probe_ipc())).await {
        Ok(ipc) => ipc,
        Err(e) => Some(Err(e)),
    };

    let mut report = ProbeReport { ipc, process: None };
    if !report.handshake() {
        let p = Arc::clone(probe);
        report.process = Some(run_probe(timeout, move || p.probe_process()).await);
    }
    report
}

/// Polls the probe and owns the endpoint state cell
pub struct EndpointMonitor<P: EndpointProbe> {
    probe: Arc<P>,
    settings: MonitorSettings,
    tracker: EndpointTracker,
    state_tx: watch::Sender<EndpointState>,
    events: broadcast::Sender<StatusEvent>,
}

impl<P: EndpointProbe> EndpointMonitor<P> {
    pub fn new(probe: Arc<P>, settings: MonitorSettings, events: broadcast::Sender<StatusEvent>) -> Self {
        let (state_tx, _) = watch::channel(EndpointState::Unknown);
        Self {
            probe,
            tracker: EndpointTracker::new(settings.failure_threshold),
            settings,
            state_tx,
            events,
        }
    }

    /// Last computed state. Never blocks.
    pub fn current_state(&self) -> EndpointState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EndpointState> {
        self.state_tx.subscribe()
    }

    /// One liveness check; publishes any transition
    pub async fn poll_once(&mut self) -> EndpointState {
        let report = check_endpoint(&self.probe, self.settings.probe_timeout).await;
        for err in report.errors() {
            debug!(error = %err, "endpoint probe failed");
        }
        if let Some((from, to)) = self.tracker.observe(&report) {
            self.publish(from, to);
        }
        self.tracker.state()
    }

    pub fn restart(&mut self) {
        if let Some((from, to)) = self.tracker.restart() {
            self.publish(from, to);
        }
    }

    fn publish(&self, from: EndpointState, to: EndpointState) {
        match to {
            EndpointState::Lost => warn!(%from, %to, "endpoint lost"),
            _ => info!(%from, %to, "endpoint state changed"),
        }
        self.state_tx.send_replace(to);
        let _ = self.events.send(StatusEvent::EndpointChanged { from, to });
    }

    /// Poll until shutdown
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            poll_ms = self.settings.poll_interval.as_millis() as u64,
            threshold = self.settings.failure_threshold,
            "endpoint monitor started"
        );
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => break,
            }
        }
        info!("endpoint monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};

    fn seen(handshake: bool, process: bool) -> ProbeReport {
        ProbeReport {
            ipc: Some(Ok(handshake)),
            process: Some(Ok(process)),
        }
    }

    fn nothing() -> ProbeReport {
        seen(false, false)
    }

    #[test]
    fn test_unknown_to_absent_to_detected() {
        let mut t = EndpointTracker::new(3);
        assert_eq!(
            t.observe(&nothing()),
            Some((EndpointState::Unknown, EndpointState::Absent))
        );
        assert_eq!(t.observe(&nothing()), None);
        assert_eq!(
            t.observe(&seen(false, true)),
            Some((EndpointState::Absent, EndpointState::Detected))
        );
    }

    #[test]
    fn test_handshake_promotes_to_reachable() {
        let mut t = EndpointTracker::new(3);
        t.observe(&seen(true, false));
        assert_eq!(t.state(), EndpointState::Detected);
        t.observe(&seen(true, false));
        assert_eq!(t.state(), EndpointState::Reachable);

        // Still running, but the IPC surface stopped answering
        t.observe(&seen(false, true));
        assert_eq!(t.state(), EndpointState::Detected);
    }

    #[test]
    fn test_reachable_lost_after_threshold_then_detected() {
        let mut t = EndpointTracker::new(3);
        t.observe(&seen(true, true));
        t.observe(&seen(true, true));
        assert_eq!(t.state(), EndpointState::Reachable);

        assert_eq!(t.observe(&nothing()), None);
        assert_eq!(t.observe(&nothing()), None);
        assert_eq!(t.consecutive_failures(), 2);
        assert_eq!(
            t.observe(&nothing()),
            Some((EndpointState::Reachable, EndpointState::Lost))
        );

        // One success: back to Detected, never straight to Reachable
        assert_eq!(
            t.observe(&seen(true, true)),
            Some((EndpointState::Lost, EndpointState::Detected))
        );
    }

    #[test]
    fn test_intermittent_failures_reset() {
        let mut t = EndpointTracker::new(3);
        t.observe(&seen(false, true));
        t.observe(&nothing());
        t.observe(&nothing());
        t.observe(&seen(false, true));
        t.observe(&nothing());
        t.observe(&nothing());
        assert_eq!(t.state(), EndpointState::Detected);
    }

    #[test]
    fn test_probe_errors_count_as_failures() {
        let mut t = EndpointTracker::new(1);
        t.observe(&seen(false, true));
        let report = ProbeReport {
            ipc: None,
            process: Some(Err(ProbeError::Timeout(Duration::from_secs(1)))),
        };
        assert_eq!(
            t.observe(&report),
            Some((EndpointState::Detected, EndpointState::Lost))
        );
    }

    #[test]
    fn test_without_ipc_detected_stays_detected() {
        let mut t = EndpointTracker::new(3);
        let process_only = ProbeReport {
            ipc: None,
            process: Some(Ok(true)),
        };
        t.observe(&process_only);
        t.observe(&process_only);
        assert_eq!(t.state(), EndpointState::Detected);
    }

    #[test]
    fn test_restart_returns_to_unknown() {
        let mut t = EndpointTracker::new(3);
        t.observe(&seen(false, true));
        assert_eq!(
            t.restart(),
            Some((EndpointState::Detected, EndpointState::Unknown))
        );
    }

    /// 0 = absent, 1 = process only, 2 = hangs
    struct ScriptedProbe {
        mode: AtomicU8,
    }

    impl EndpointProbe for ScriptedProbe {
        fn probe_ipc(&self) -> Option<Result<bool, ProbeError>> {
            None
        }

        fn probe_process(&self) -> Result<bool, ProbeError> {
            match self.mode.load(Ordering::SeqCst) {
                0 => Ok(false),
                1 => Ok(true),
                _ => {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(true)
                }
            }
        }
    }

    #[tokio::test]
    async fn test_monitor_publishes_transitions() {
        let probe = Arc::new(ScriptedProbe {
            mode: AtomicU8::new(1),
        });
        let (events_tx, mut events_rx) = broadcast::channel(16);
        let settings = MonitorSettings {
            poll_interval: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(50),
            failure_threshold: 1,
        };
        let mut monitor = EndpointMonitor::new(Arc::clone(&probe), settings, events_tx);
        let state_rx = monitor.subscribe();

        assert_eq!(monitor.current_state(), EndpointState::Unknown);
        assert_eq!(monitor.poll_once().await, EndpointState::Detected);
        assert_eq!(*state_rx.borrow(), EndpointState::Detected);
        assert_eq!(
            events_rx.recv().await.unwrap(),
            StatusEvent::EndpointChanged {
                from: EndpointState::Unknown,
                to: EndpointState::Detected
            }
        );

        // A hung probe times out and counts as a failed check
        probe.mode.store(2, Ordering::SeqCst);
        assert_eq!(monitor.poll_once().await, EndpointState::Lost);
    }
}
