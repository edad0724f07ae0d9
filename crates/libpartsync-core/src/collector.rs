//! Debounced change collector
//!
//! Turns the raw, bursty stream of filesystem notifications into one
//! [`ChangeSet`] per quiet window. A window closes once no event has arrived
//! for the debounce interval.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::types::binding::RepositoryBinding;
use crate::types::change::{ChangeEvent, ChangeKind, ChangeSet, RawChange};
use crate::types::ids::RepositoryId;

/// Accumulates change events for the currently open window
pub struct ChangeCollector {
    /// (root, id), longest root first
    roots: Vec<(PathBuf, RepositoryId)>,
    window: ChangeSet,
}

impl ChangeCollector {
    pub fn new(bindings: &[RepositoryBinding]) -> Self {
        let mut roots: Vec<(PathBuf, RepositoryId)> = bindings
            .iter()
            .map(|b| (b.local_path.clone(), b.id.clone()))
            .collect();
        roots.sort_by(|a, b| b.0.components().count().cmp(&a.0.components().count()));
        Self {
            roots,
            window: ChangeSet::new(),
        }
    }

    /// Binding owning `path`, by longest matching root
    pub fn resolve(&self, path: &Path) -> Option<&RepositoryId> {
        self.roots
            .iter()
            .find(|(root, _)| path.starts_with(root))
            .map(|(_, id)| id)
    }

    /// Add a raw notification to the open window.
    ///
    /// Returns false when the notification was discarded.
    pub fn record(&mut self, raw: RawChange) -> bool {
        if raw.path.as_os_str().is_empty() || !raw.path.is_absolute() {
            warn!(path = %raw.path.display(), "discarding malformed change notification");
            return false;
        }
        if is_git_internal(&raw.path) {
            trace!(path = %raw.path.display(), "ignoring git metadata change");
            return false;
        }

        let source = raw
            .renamed_from
            .as_deref()
            .filter(|from| from.is_absolute() && !is_git_internal(from))
            .and_then(|from| self.resolve(from).cloned().map(|id| (from.to_path_buf(), id)));

        let Some(id) = self.resolve(&raw.path).cloned() else {
            // Moved out of every watched tree
            if let Some((from, from_id)) = source {
                self.window.insert(ChangeEvent {
                    path: from,
                    kind: ChangeKind::Deleted,
                    timestamp: raw.timestamp,
                    repository_id: from_id,
                    renamed_from: None,
                });
                return true;
            }
            trace!(path = %raw.path.display(), "ignoring change outside watched trees");
            return false;
        };

        let mut raw = raw;
        if let Some((from, from_id)) = source {
            if from_id != id {
                // Moved across bindings: a delete on one side, a create on the other
                self.window.insert(ChangeEvent {
                    path: from,
                    kind: ChangeKind::Deleted,
                    timestamp: raw.timestamp,
                    repository_id: from_id,
                    renamed_from: None,
                });
                raw.renamed_from = None;
            }
        } else {
            raw.renamed_from = None;
        }

        self.window.insert(ChangeEvent::from_raw(raw, id));
        true
    }

    /// Close the window and hand out its contents
    pub fn flush(&mut self) -> Option<ChangeSet> {
        if self.window.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.window))
    }

    pub fn pending(&self) -> usize {
        self.window.len()
    }
}

fn is_git_internal(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == ".git"))
}

/// Drive a collector from a raw notification channel.
///
/// Emits one change-set per window on `out_tx`. Closing the input channel
/// or a shutdown signal forces a final flush.
pub async fn run_collector(
    mut collector: ChangeCollector,
    mut raw_rx: mpsc::Receiver<RawChange>,
    debounce: Duration,
    out_tx: mpsc::Sender<ChangeSet>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(debounce_ms = debounce.as_millis() as u64, "change collector started");

    loop {
        if collector.pending() == 0 {
            tokio::select! {
                raw = raw_rx.recv() => match raw {
                    Some(raw) => {
                        collector.record(raw);
                    }
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        } else {
            tokio::select! {
                raw = raw_rx.recv() => match raw {
                    Some(raw) => {
                        collector.record(raw);
                    }
                    None => break,
                },
                _ = tokio::time::sleep(debounce) => {
                    if let Some(set) = collector.flush() {
                        debug!(paths = set.len(), "change window closed");
                        if out_tx.send(set).await.is_err() {
                            debug!("change-set consumer gone, stopping collector");
                            return;
                        }
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    if let Some(set) = collector.flush() {
        debug!(paths = set.len(), "forced flush of open change window");
        let _ = out_tx.send(set).await;
    }
    info!("change collector stopped");
}
