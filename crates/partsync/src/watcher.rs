//! Bridge from the OS watch facility to the change collector

use std::path::PathBuf;

use libpartsync_core::{ChangeKind, PartsyncError, RawChange, RepositoryBinding};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Keeps the OS watches alive; dropping it stops event delivery
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl FsWatcher {
    /// Watch every binding recursively, forwarding raw changes to `tx`.
    ///
    /// The callback runs on the watcher's own thread and blocks when the
    /// collector falls behind.
    pub fn start(
        bindings: &[RepositoryBinding],
        tx: mpsc::Sender<RawChange>,
    ) -> Result<Self, PartsyncError> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for raw in to_raw_changes(&event) {
                    if tx.blocking_send(raw).is_err() {
                        debug!("collector gone, dropping filesystem event");
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "filesystem watch error"),
        })
        .map_err(watch_error)?;

        let mut roots = Vec::with_capacity(bindings.len());
        for binding in bindings {
            watcher
                .watch(&binding.local_path, RecursiveMode::Recursive)
                .map_err(watch_error)?;
            info!(repository = %binding.id, path = %binding.local_path.display(), "watching");
            roots.push(binding.local_path.clone());
        }

        Ok(Self {
            _watcher: watcher,
            roots,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

fn watch_error(e: notify::Error) -> PartsyncError {
    PartsyncError::Internal(format!("cannot watch filesystem: {}", e))
}

/// Translate one notify event. Access and metadata-only events are dropped.
pub fn to_raw_changes(event: &Event) -> Vec<RawChange> {
    let each = |kind: ChangeKind| -> Vec<RawChange> {
        event
            .paths
            .iter()
            .map(|p| RawChange::new(p.clone(), kind))
            .collect()
    };

    match &event.kind {
        EventKind::Create(_) => each(ChangeKind::Created),
        EventKind::Remove(_) => each(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![RawChange::new(to.clone(), ChangeKind::Renamed).renamed_from(from.clone())],
            _ => each(ChangeKind::Modified),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(ChangeKind::Created),
        // Platforms that cannot pair the two ends of a rename
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                };
                RawChange::new(p.clone(), kind)
            })
            .collect(),
        EventKind::Modify(_) => each(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    fn kinds(changes: &[RawChange]) -> Vec<ChangeKind> {
        changes.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn test_basic_kinds() {
        let created = to_raw_changes(&event(EventKind::Create(CreateKind::File), &["/lib/a"]));
        assert_eq!(kinds(&created), [ChangeKind::Created]);

        let modified = to_raw_changes(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/lib/a"],
        ));
        assert_eq!(kinds(&modified), [ChangeKind::Modified]);

        let removed = to_raw_changes(&event(EventKind::Remove(RemoveKind::File), &["/lib/a"]));
        assert_eq!(kinds(&removed), [ChangeKind::Deleted]);
    }

    #[test]
    fn test_paired_rename() {
        let changes = to_raw_changes(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/lib/old.kicad_mod", "/lib/new.kicad_mod"],
        ));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Renamed);
        assert_eq!(changes[0].path, PathBuf::from("/lib/new.kicad_mod"));
        assert_eq!(
            changes[0].renamed_from.as_deref(),
            Some(PathBuf::from("/lib/old.kicad_mod").as_path())
        );
    }

    #[test]
    fn test_unpaired_rename_halves() {
        let from = to_raw_changes(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/lib/old"],
        ));
        assert_eq!(kinds(&from), [ChangeKind::Deleted]);

        let to = to_raw_changes(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/lib/new"],
        ));
        assert_eq!(kinds(&to), [ChangeKind::Created]);
    }

    #[test]
    fn test_noise_is_dropped() {
        let access = event(EventKind::Access(AccessKind::Any), &["/lib/a"]);
        assert!(to_raw_changes(&access).is_empty());

        let meta = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
            &["/lib/a"],
        );
        assert!(to_raw_changes(&meta).is_empty());
    }
}
