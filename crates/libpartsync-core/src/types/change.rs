//! Filesystem change events and the coalesced change-sets built from them

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RepositoryId;

/// Kind of filesystem change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeKind {
    fn tag(&self) -> u8 {
        match self {
            ChangeKind::Created => 1,
            ChangeKind::Modified => 2,
            ChangeKind::Deleted => 3,
            ChangeKind::Renamed => 4,
        }
    }
}

/// Raw notification as delivered by the OS watch facility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
    /// Previous location, for renames that report both ends
    pub renamed_from: Option<PathBuf>,
}

impl RawChange {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: Utc::now(),
            renamed_from: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn renamed_from(mut self, from: impl Into<PathBuf>) -> Self {
        self.renamed_from = Some(from.into());
        self
    }
}

/// A recorded change attributed to one repository binding. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
    pub repository_id: RepositoryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<PathBuf>,
}

impl ChangeEvent {
    pub fn from_raw(raw: RawChange, repository_id: RepositoryId) -> Self {
        Self {
            path: raw.path,
            kind: raw.kind,
            timestamp: raw.timestamp,
            repository_id,
            renamed_from: raw.renamed_from,
        }
    }
}

/// Latest change per path within one debounce window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<ChangeEvent>", from = "Vec<ChangeEvent>")]
pub struct ChangeSet {
    entries: BTreeMap<PathBuf, ChangeEvent>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event, keeping the latest one per path.
    ///
    /// Ties on timestamp go to the event inserted last.
    pub fn insert(&mut self, event: ChangeEvent) {
        match self.entries.entry(event.path.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(event);
            }
            Entry::Occupied(mut slot) => {
                if event.timestamp >= slot.get().timestamp {
                    slot.insert(event);
                }
            }
        }
    }

    /// Merge another set into this one (union of paths, last writer wins)
    pub fn merge(&mut self, other: ChangeSet) {
        for event in other.entries.into_values() {
            self.insert(event);
        }
    }

    /// Split the set by owning repository
    pub fn partition(self) -> BTreeMap<RepositoryId, ChangeSet> {
        let mut parts: BTreeMap<RepositoryId, ChangeSet> = BTreeMap::new();
        for event in self.entries.into_values() {
            parts
                .entry(event.repository_id.clone())
                .or_default()
                .insert(event);
        }
        parts
    }

    pub fn get(&self, path: &Path) -> Option<&ChangeEvent> {
        self.entries.get(path)
    }

    pub fn events(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.entries.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Content digest: BLAKE2b-256 over the sorted (repository, path, kind)
    /// entries. Timestamps are excluded, so replaying the same edits yields
    /// the same digest.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Blake2b::<U32>::new();
        for event in self.entries.values() {
            hasher.update(event.repository_id.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(event.path.to_string_lossy().as_bytes());
            hasher.update([0u8, event.kind.tag()]);
            if let Some(from) = &event.renamed_from {
                hasher.update(from.to_string_lossy().as_bytes());
            }
            hasher.update([0xffu8]);
        }
        hasher.finalize().into()
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}

impl From<ChangeSet> for Vec<ChangeEvent> {
    fn from(set: ChangeSet) -> Self {
        set.entries.into_values().collect()
    }
}

impl From<Vec<ChangeEvent>> for ChangeSet {
    fn from(events: Vec<ChangeEvent>) -> Self {
        events.into_iter().collect()
    }
}

impl FromIterator<ChangeEvent> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = ChangeEvent>>(iter: I) -> Self {
        let mut set = ChangeSet::new();
        for event in iter {
            set.insert(event);
        }
        set
    }
}
