use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::MonitorSettings;
use crate::error::PartsyncError;
use crate::ledger::RetentionPolicy;
use crate::orchestrator::OrchestratorSettings;
use crate::retry::RetryPolicy;
use crate::types::binding::{RepositoryBinding, DEFAULT_REMOTE};
use crate::types::endpoint::SyncGate;
use crate::types::ids::RepositoryId;

/// Remote status polls never run more often than this
pub const MIN_STATUS_POLL_SECS: u64 = 30;

/// Upper bound on ledger retention, about a century
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Application configuration, loaded once at startup from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Quiet period that closes a change window
    pub debounce_ms: u64,
    /// System-wide limit on Running jobs
    pub max_concurrent_jobs: usize,
    /// Promote jobs even while the application is not detected
    pub sync_while_absent: bool,
    /// Directory holding the instance lock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    pub retry: RetryConfig,
    pub endpoint: EndpointConfig,
    pub jobs: JobsConfig,
    pub ledger: LedgerConfig,
    pub status: StatusConfig,
    #[serde(rename = "repository")]
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            max_concurrent_jobs: 4,
            sync_while_absent: false,
            state_dir: None,
            retry: RetryConfig::default(),
            endpoint: EndpointConfig::default(),
            jobs: JobsConfig::default(),
            ledger: LedgerConfig::default(),
            status: StatusConfig::default(),
            repositories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 5,
        }
    }
}

/// How the target application is detected
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    pub poll_interval_ms: u64,
    /// Consecutive failed checks before a present application counts as lost
    pub failure_threshold: u32,
    pub probe_timeout_ms: u64,
    /// Executable names matched case-insensitively against running processes
    pub process_names: Vec<String>,
    /// IPC surface (socket or pipe path) exposed by the application
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipc_path: Option<PathBuf>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            failure_threshold: 3,
            probe_timeout_ms: 1_000,
            process_names: vec!["kicad.exe".to_string(), "kicad".to_string()],
            ipc_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsConfig {
    pub attempt_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 30_000,
            shutdown_grace_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub retention_days: u32,
    pub max_entries_per_repository: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            max_entries_per_repository: 1_000,
        }
    }
}

/// Periodic ahead/behind checks against each remote
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 150,
        }
    }
}

/// One `[[repository]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub id: String,
    pub local_path: PathBuf,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

fn default_remote() -> String {
    DEFAULT_REMOTE.to_string()
}

impl AppConfig {
    /// Parse a config document. Relative repository paths resolve against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self, PartsyncError> {
        let mut config: AppConfig = toml::from_str(content)?;
        config.resolve_paths(base_dir);
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, PartsyncError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        for repo in &mut self.repositories {
            if repo.local_path.is_relative() {
                repo.local_path = base_dir.join(&repo.local_path);
            }
        }
        if let Some(state_dir) = &self.state_dir {
            if state_dir.is_relative() {
                self.state_dir = Some(base_dir.join(state_dir));
            }
        }
    }

    /// Check every startup invariant. Any violation is fatal.
    pub fn validate(&self) -> Result<(), PartsyncError> {
        if self.repositories.is_empty() {
            return Err(invalid("no [[repository]] entries configured"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(invalid("max_concurrent_jobs must be at least 1"));
        }
        if self.debounce_ms == 0 {
            return Err(invalid("debounce_ms must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(invalid("retry.base_delay_ms must be greater than zero"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.endpoint.poll_interval_ms == 0 {
            return Err(invalid("endpoint.poll_interval_ms must be greater than zero"));
        }
        if self.endpoint.probe_timeout_ms == 0 {
            return Err(invalid("endpoint.probe_timeout_ms must be greater than zero"));
        }
        if self.endpoint.failure_threshold == 0 {
            return Err(invalid("endpoint.failure_threshold must be at least 1"));
        }
        if self.endpoint.process_names.is_empty() && self.endpoint.ipc_path.is_none() {
            return Err(invalid(
                "endpoint needs at least one of process_names or ipc_path",
            ));
        }
        if self.jobs.attempt_timeout_ms == 0 {
            return Err(invalid("jobs.attempt_timeout_ms must be greater than zero"));
        }
        if self.ledger.retention_days > MAX_RETENTION_DAYS {
            return Err(invalid(format!(
                "ledger.retention_days must be at most {}",
                MAX_RETENTION_DAYS
            )));
        }

        let mut resolved: Vec<PathBuf> = Vec::with_capacity(self.repositories.len());
        for (i, repo) in self.repositories.iter().enumerate() {
            if repo.id.trim().is_empty() {
                return Err(invalid(format!("repository #{} has an empty id", i + 1)));
            }
            if repo.remote.trim().is_empty() {
                return Err(invalid(format!("repository '{}' has an empty remote", repo.id)));
            }
            if !repo.local_path.exists() {
                return Err(invalid(format!(
                    "repository '{}': local_path {} does not exist",
                    repo.id,
                    repo.local_path.display()
                )));
            }
            if !repo.local_path.is_dir() {
                return Err(invalid(format!(
                    "repository '{}': local_path {} is not a directory",
                    repo.id,
                    repo.local_path.display()
                )));
            }
            // Compare resolved paths so symlinks and `..` cannot hide nesting
            let canonical = std::fs::canonicalize(&repo.local_path)?;
            for (other, other_path) in self.repositories[..i].iter().zip(&resolved) {
                if other.id == repo.id {
                    return Err(invalid(format!("duplicate repository id '{}'", repo.id)));
                }
                if canonical.starts_with(other_path) || other_path.starts_with(&canonical) {
                    return Err(invalid(format!(
                        "repositories '{}' and '{}' have nested local paths",
                        other.id, repo.id
                    )));
                }
            }
            resolved.push(canonical);
        }
        Ok(())
    }

    /// Repository bindings, in configuration order
    pub fn bindings(&self) -> Vec<RepositoryBinding> {
        self.repositories
            .iter()
            .map(|repo| RepositoryBinding {
                id: RepositoryId::new(repo.id.clone()),
                local_path: repo.local_path.clone(),
                remote: repo.remote.clone(),
                remote_url: repo.remote_url.clone(),
                branch: repo.branch.clone(),
                last_synced_revision: None,
            })
            .collect()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            max_attempts: self.retry.max_attempts,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(self.endpoint.poll_interval_ms),
            probe_timeout: Duration::from_millis(self.endpoint.probe_timeout_ms),
            failure_threshold: self.endpoint.failure_threshold,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_concurrent: self.max_concurrent_jobs,
            gate: SyncGate::from_sync_while_absent(self.sync_while_absent),
            retry: self.retry_policy(),
            attempt_timeout: Duration::from_millis(self.jobs.attempt_timeout_ms),
            shutdown_grace: Duration::from_millis(self.jobs.shutdown_grace_ms),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: chrono::Duration::days(i64::from(self.ledger.retention_days)),
            max_entries_per_repository: self.ledger.max_entries_per_repository,
        }
    }

    /// Status poll interval, clamped to the floor
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status.poll_interval_secs.max(MIN_STATUS_POLL_SECS))
    }
}

fn invalid(msg: impl Into<String>) -> PartsyncError {
    PartsyncError::InvalidConfig(msg.into())
}

/// Load, resolve and validate the config file at `path`
pub fn load_config(path: &Path) -> Result<AppConfig, PartsyncError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PartsyncError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut config = AppConfig::from_toml_str(&content, base_dir)?;
    config.validate()?;

    // Watch events arrive with canonical paths
    for repo in &mut config.repositories {
        repo.local_path = std::fs::canonicalize(&repo.local_path)?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("partsync.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_apply() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("symbols")).unwrap();
        let path = write_config(
            &dir,
            r#"
[[repository]]
id = "symbols"
local_path = "symbols"
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.jobs.shutdown_grace_ms, 10_000);
        assert_eq!(config.ledger.retention_days, 7);

        let bindings = config.bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].remote, "origin");
        assert!(bindings[0].local_path.is_absolute());
    }

    #[test]
    fn test_missing_repositories_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "debounce_ms = 200\n");
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, PartsyncError::InvalidConfig(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_local_path_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[[repository]]
id = "gone"
local_path = "does-not-exist"
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_duplicate_and_nested_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();

        let dup = write_config(
            &dir,
            r#"
[[repository]]
id = "a"
local_path = "a"

[[repository]]
id = "a"
local_path = "a/b"
"#,
        );
        assert!(load_config(&dup).unwrap_err().to_string().contains("duplicate"));

        let nested = write_config(
            &dir,
            r#"
[[repository]]
id = "outer"
local_path = "a"

[[repository]]
id = "inner"
local_path = "a/b"
"#,
        );
        assert!(load_config(&nested).unwrap_err().to_string().contains("nested"));
    }

    #[test]
    fn test_nesting_detected_through_dot_dot() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();
        let path = write_config(
            &dir,
            r#"
[[repository]]
id = "outer"
local_path = "a"

[[repository]]
id = "inner"
local_path = "c/../a/b"
"#,
        );
        assert!(load_config(&path).unwrap_err().to_string().contains("nested"));
    }

    #[cfg(unix)]
    #[test]
    fn test_nesting_detected_through_symlink() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("libs/symbols")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("libs/symbols"), dir.path().join("linked"))
            .unwrap();
        let path = write_config(
            &dir,
            r#"
[[repository]]
id = "libs"
local_path = "libs"

[[repository]]
id = "symbols"
local_path = "linked"
"#,
        );
        assert!(load_config(&path).unwrap_err().to_string().contains("nested"));
    }

    #[test]
    fn test_retention_out_of_range_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        let path = write_config(
            &dir,
            r#"
[ledger]
retention_days = 4000000000

[[repository]]
id = "lib"
local_path = "lib"
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("retention_days"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        let path = write_config(
            &dir,
            r#"
max_concurrent_jobs = 0

[[repository]]
id = "lib"
local_path = "lib"
"#,
        );
        assert!(load_config(&path)
            .unwrap_err()
            .to_string()
            .contains("max_concurrent_jobs"));
    }

    #[test]
    fn test_unknown_key_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "debounce = 10\n");
        let err = load_config(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_status_interval_floor() {
        let mut config = AppConfig::default();
        config.status.poll_interval_secs = 5;
        assert_eq!(config.status_poll_interval(), Duration::from_secs(30));
        config.status.poll_interval_secs = 300;
        assert_eq!(config.status_poll_interval(), Duration::from_secs(300));
    }
}
