//! Single-instance lock
//!
//! One supervisor may own a state directory at a time. Exclusion comes from
//! an OS file lock held for the owner's lifetime ([`InstanceGuard`]). The
//! owner also publishes a JSON lease, extended by periodic heartbeats, that
//! tells other commands who holds the directory and until when.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::IpcError;
use crate::DEFAULT_LEASE_MS;

const LOCK_FILE: &str = "partsync.lock";
const GUARD_FILE: &str = "partsync.guard";

/// Exclusive file lock on `<state_dir>/partsync.guard`.
///
/// Released when dropped. The guard file itself is left in place.
#[derive(Debug)]
pub struct InstanceGuard {
    _file: File,
    state_dir: PathBuf,
}

impl InstanceGuard {
    pub fn guard_path(state_dir: &Path) -> PathBuf {
        state_dir.join(GUARD_FILE)
    }

    /// Take the lock without blocking.
    ///
    /// Returns `IpcError::StateDirBusy` if another holder has it.
    pub fn try_acquire(state_dir: &Path) -> Result<Self, IpcError> {
        fs::create_dir_all(state_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(Self::guard_path(state_dir))?;

        if let Err(e) = file.try_lock_exclusive() {
            let holder = match InstanceLock::read(state_dir) {
                Ok(Some(lease)) => format!("PID {}", lease.pid),
                _ => "unknown process".to_string(),
            };
            return Err(IpcError::StateDirBusy(format!(
                "{} held by {} ({})",
                state_dir.display(),
                holder,
                e
            )));
        }

        Ok(Self {
            _file: file,
            state_dir: state_dir.to_path_buf(),
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

/// Lock stored at `<state_dir>/partsync.lock`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLock {
    /// Process ID of the lock holder
    pub pid: u32,
    /// When the supervisor started (Unix timestamp in ms)
    pub started_ts: u64,
    /// Config file the holder was started with
    pub config_path: String,
    /// Lease duration in milliseconds
    pub lease_ms: u64,
    /// Last heartbeat timestamp (Unix timestamp in ms)
    pub last_heartbeat_ts: u64,
    /// When the lock expires (Unix timestamp in ms)
    pub expires_ts: u64,
}

impl InstanceLock {
    pub fn new(pid: u32, config_path: String) -> Self {
        let now = current_time_ms();
        Self {
            pid,
            started_ts: now,
            config_path,
            lease_ms: DEFAULT_LEASE_MS,
            last_heartbeat_ts: now,
            expires_ts: now + DEFAULT_LEASE_MS,
        }
    }

    pub fn with_lease(mut self, lease_ms: u64) -> Self {
        self.lease_ms = lease_ms;
        self.expires_ts = self.last_heartbeat_ts + lease_ms;
        self
    }

    pub fn is_expired(&self) -> bool {
        current_time_ms() > self.expires_ts
    }

    pub fn is_owned_by_current_process(&self) -> bool {
        self.pid == std::process::id()
    }

    /// Remaining time until expiration in milliseconds
    pub fn time_remaining_ms(&self) -> u64 {
        self.expires_ts.saturating_sub(current_time_ms())
    }

    /// Extend the lease from now
    pub fn refresh(&mut self) {
        let now = current_time_ms();
        self.last_heartbeat_ts = now;
        self.expires_ts = now + self.lease_ms;
    }

    pub fn lock_path(state_dir: &Path) -> PathBuf {
        state_dir.join(LOCK_FILE)
    }

    pub fn read(state_dir: &Path) -> Result<Option<Self>, IpcError> {
        let path = Self::lock_path(state_dir);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)?;
        let lock = serde_json::from_str(&contents)
            .map_err(|e| IpcError::LockFile(format!("{}: {}", path.display(), e)))?;
        Ok(Some(lock))
    }

    /// Write through a temporary file so readers never see a partial lock
    pub fn write(&self, state_dir: &Path) -> Result<(), IpcError> {
        fs::create_dir_all(state_dir)?;
        let path = Self::lock_path(state_dir);
        let tmp = path.with_extension("lock.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(state_dir: &Path) -> Result<(), IpcError> {
        let path = Self::lock_path(state_dir);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Return the live lease held by another process, if any
    pub fn held_by_other(state_dir: &Path) -> Result<Option<Self>, IpcError> {
        Ok(Self::read(state_dir)?
            .filter(|lock| !lock.is_expired() && !lock.is_owned_by_current_process()))
    }

    /// Publish a lease for the directory `guard` holds, unless another live
    /// process still has one
    pub fn acquire(guard: &InstanceGuard, config_path: String) -> Result<Self, IpcError> {
        let state_dir = guard.state_dir();
        if let Some(existing) = Self::held_by_other(state_dir)? {
            return Err(IpcError::LockHeld {
                pid: existing.pid,
                expires_in_ms: existing.time_remaining_ms(),
            });
        }

        let lock = InstanceLock::new(std::process::id(), config_path);
        lock.write(state_dir)?;
        Ok(lock)
    }

    /// Refresh and persist the lease. Fails if another process took over.
    pub fn heartbeat(&mut self, state_dir: &Path) -> Result<(), IpcError> {
        if let Some(existing) = Self::read(state_dir)? {
            if existing.pid != self.pid && !existing.is_expired() {
                return Err(IpcError::LockHeld {
                    pid: existing.pid,
                    expires_in_ms: existing.time_remaining_ms(),
                });
            }
        }
        self.refresh();
        self.write(state_dir)
    }

    /// Release the lock (only if owned by current process)
    pub fn release(state_dir: &Path) -> Result<(), IpcError> {
        if let Some(lock) = Self::read(state_dir)? {
            if lock.is_owned_by_current_process() {
                Self::remove(state_dir)?;
            }
        }
        Ok(())
    }
}

fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn foreign(config: &str) -> InstanceLock {
        // pid 0 is never a user process
        InstanceLock::new(0, config.to_string())
    }

    #[test]
    fn test_lock_expiration() {
        let mut lock = InstanceLock::new(1234, "/etc/partsync.toml".to_string());
        assert!(!lock.is_expired());

        lock.expires_ts = 0;
        assert!(lock.is_expired());
        assert_eq!(lock.time_remaining_ms(), 0);

        lock.refresh();
        assert!(!lock.is_expired());
    }

    #[test]
    fn test_lock_read_write() {
        let temp = TempDir::new().unwrap();
        let lock = InstanceLock::new(std::process::id(), "partsync.toml".to_string());
        lock.write(temp.path()).unwrap();

        let read = InstanceLock::read(temp.path()).unwrap().unwrap();
        assert_eq!(read, lock);
        assert!(!InstanceLock::lock_path(temp.path())
            .with_extension("lock.tmp")
            .exists());
    }

    #[test]
    fn test_acquire_release() {
        let temp = TempDir::new().unwrap();
        let guard = InstanceGuard::try_acquire(temp.path()).unwrap();
        let lock = InstanceLock::acquire(&guard, "a.toml".to_string()).unwrap();
        assert!(lock.is_owned_by_current_process());

        // Re-acquiring from the same process is allowed
        InstanceLock::acquire(&guard, "a.toml".to_string()).unwrap();

        InstanceLock::release(temp.path()).unwrap();
        assert!(InstanceLock::read(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_acquire_refused_while_other_holds_lease() {
        let temp = TempDir::new().unwrap();
        foreign("other.toml").write(temp.path()).unwrap();

        let guard = InstanceGuard::try_acquire(temp.path()).unwrap();
        let err = InstanceLock::acquire(&guard, "mine.toml".to_string()).unwrap_err();
        assert!(matches!(err, IpcError::LockHeld { pid: 0, .. }));
        assert_eq!(err.code(), "busy");
        assert!(InstanceLock::held_by_other(temp.path()).unwrap().is_some());

        // Release by a non-owner leaves the lock alone
        InstanceLock::release(temp.path()).unwrap();
        assert!(InstanceLock::read(temp.path()).unwrap().is_some());
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let temp = TempDir::new().unwrap();
        let mut stale = foreign("other.toml");
        stale.expires_ts = 1;
        stale.write(temp.path()).unwrap();

        let guard = InstanceGuard::try_acquire(temp.path()).unwrap();
        let lock = InstanceLock::acquire(&guard, "mine.toml".to_string()).unwrap();
        assert_eq!(lock.config_path, "mine.toml");
    }

    #[test]
    fn test_heartbeat_detects_takeover() {
        let temp = TempDir::new().unwrap();
        let guard = InstanceGuard::try_acquire(temp.path()).unwrap();
        let mut lock = InstanceLock::acquire(&guard, "mine.toml".to_string()).unwrap();
        lock.heartbeat(temp.path()).unwrap();

        foreign("other.toml").write(temp.path()).unwrap();
        assert!(lock.heartbeat(temp.path()).is_err());
    }

    #[test]
    fn test_corrupt_lock_file() {
        let temp = TempDir::new().unwrap();
        fs::write(InstanceLock::lock_path(temp.path()), "not json").unwrap();
        assert!(matches!(
            InstanceLock::read(temp.path()),
            Err(IpcError::LockFile(_))
        ));
    }

    #[test]
    fn test_guard_excludes_second_holder() {
        let temp = TempDir::new().unwrap();
        let guard = InstanceGuard::try_acquire(temp.path()).unwrap();
        InstanceLock::acquire(&guard, "first.toml".to_string()).unwrap();

        let err = InstanceGuard::try_acquire(temp.path()).unwrap_err();
        assert_eq!(err.code(), "busy");
        assert!(err.to_string().contains(&format!("PID {}", std::process::id())));

        let other = File::open(InstanceGuard::guard_path(temp.path())).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(guard);
        InstanceGuard::try_acquire(temp.path()).unwrap();
    }
}
