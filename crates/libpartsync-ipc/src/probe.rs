//! System endpoint probe
//!
//! Detects the target application through its IPC surface when one is
//! configured, and through the process table otherwise.

use std::path::{Path, PathBuf};

use libpartsync_core::{EndpointProbe, ProbeError};
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tracing::trace;

/// Probe backed by the local OS
#[derive(Debug, Clone)]
pub struct SystemProbe {
    ipc_path: Option<PathBuf>,
    /// Lowercased, without any `.exe` suffix
    process_names: Vec<String>,
}

impl SystemProbe {
    pub fn new(ipc_path: Option<PathBuf>, process_names: &[String]) -> Self {
        let mut names: Vec<String> = process_names
            .iter()
            .map(|n| normalize_name(n))
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        names.dedup();
        Self {
            ipc_path,
            process_names: names,
        }
    }

    pub fn process_names(&self) -> &[String] {
        &self.process_names
    }

    /// Whether a running process name matches one of the configured names
    pub fn matches(&self, process_name: &str) -> bool {
        let name = normalize_name(process_name);
        self.process_names.iter().any(|n| *n == name)
    }
}

fn normalize_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

impl EndpointProbe for SystemProbe {
    fn probe_ipc(&self) -> Option<Result<bool, ProbeError>> {
        self.ipc_path.as_deref().map(handshake)
    }

    fn probe_process(&self) -> Result<bool, ProbeError> {
        if self.process_names.is_empty() {
            return Ok(false);
        }
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        let found = system
            .processes()
            .values()
            .any(|process| self.matches(&process.name().to_string_lossy()));
        trace!(found, candidates = system.processes().len(), "process scan");
        Ok(found)
    }
}

/// Connect to the application's socket. A path that is not a socket only
/// has to exist.
#[cfg(unix)]
fn handshake(path: &Path) -> Result<bool, ProbeError> {
    use std::io::ErrorKind;
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::UnixStream;

    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if !meta.file_type().is_socket() {
        return Ok(true);
    }
    match UnixStream::connect(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Named pipes and other IPC files only have to exist
#[cfg(not(unix))]
fn handshake(path: &Path) -> Result<bool, ProbeError> {
    match std::fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_name_matching() {
        let probe = SystemProbe::new(None, &["KiCad.exe".to_string(), "kicad".to_string()]);
        assert_eq!(probe.process_names(), ["kicad"]);
        assert!(probe.matches("kicad"));
        assert!(probe.matches("KICAD.EXE"));
        assert!(!probe.matches("kicad-cli"));
        assert!(!probe.matches("eeschema"));
    }

    #[test]
    fn test_no_ipc_configured() {
        let probe = SystemProbe::new(None, &["kicad".to_string()]);
        assert!(probe.probe_ipc().is_none());
    }

    #[test]
    fn test_ipc_path_missing_and_present() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("api.sock");
        let probe = SystemProbe::new(Some(path.clone()), &[]);
        assert_eq!(probe.probe_ipc(), Some(Ok(false)));

        std::fs::write(&path, "").unwrap();
        assert_eq!(probe.probe_ipc(), Some(Ok(true)));
    }

    #[cfg(unix)]
    #[test]
    fn test_socket_handshake() {
        use std::os::unix::net::UnixListener;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("api.sock");
        let probe = SystemProbe::new(Some(path.clone()), &[]);

        let listener = UnixListener::bind(&path).unwrap();
        assert_eq!(probe.probe_ipc(), Some(Ok(true)));

        // Socket file left behind by a dead application
        drop(listener);
        assert_eq!(probe.probe_ipc(), Some(Ok(false)));
    }

    #[test]
    fn test_process_scan_without_names() {
        let probe = SystemProbe::new(None, &[]);
        assert_eq!(probe.probe_process(), Ok(false));
    }

    #[test]
    fn test_process_scan_finds_nothing_absurd() {
        let probe = SystemProbe::new(None, &["partsync-no-such-process-4a1f".to_string()]);
        assert_eq!(probe.probe_process(), Ok(false));
    }
}
