//! Settings for the configuration service itself.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Service settings, loaded through [`super::SettingsLoader`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceSettings {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub versions: VersionSettings,

    #[serde(default)]
    pub audit: AuditSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,

    #[serde(default)]
    pub deployment: Deployment,
}

impl ServiceSettings {
    /// Settings rooted at `data_dir` with every other value defaulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut settings = Self::default();
        settings.storage.data_dir = data_dir.into();
        settings
    }

    pub fn config_file(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.config_file)
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.versions_dir)
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.audit_dir)
    }

    pub fn monitor_state_file(&self) -> PathBuf {
        self.storage.data_dir.join("monitor-state.json")
    }

    /// Create every backing directory.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.storage.data_dir)?;
        std::fs::create_dir_all(self.versions_dir())?;
        std::fs::create_dir_all(self.audit_dir())?;
        Ok(())
    }
}

/// Deployment context; production turns failing critical checks into a hard stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    Production,
    Staging,
    #[default]
    Development,
}

impl Deployment {
    pub fn is_production(&self) -> bool {
        matches!(self, Deployment::Production)
    }
}

impl std::str::FromStr for Deployment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Deployment::Production),
            "staging" => Ok(Deployment::Staging),
            "development" | "dev" => Ok(Deployment::Development),
            _ => Err(format!(
                "Invalid deployment '{}'. Valid options: production, staging, development",
                s
            )),
        }
    }
}

impl std::fmt::Display for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Deployment::Production => write!(f, "production"),
            Deployment::Staging => write!(f, "staging"),
            Deployment::Development => write!(f, "development"),
        }
    }
}

/// Backing store layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File name of the current snapshot inside `data_dir`.
    #[serde(default = "default_config_file")]
    pub config_file: String,

    #[serde(default = "default_versions_dir")]
    pub versions_dir: String,

    #[serde(default = "default_audit_dir")]
    pub audit_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            config_file: default_config_file(),
            versions_dir: default_versions_dir(),
            audit_dir: default_audit_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("config-sentinel/data")
}

fn default_config_file() -> String {
    "bot-config.yaml".to_string()
}

fn default_versions_dir() -> String {
    "versions".to_string()
}

fn default_audit_dir() -> String {
    "audit".to_string()
}

/// Version archive retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSettings {
    /// Number of most recent version records kept.
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,

    /// Deletions in flight at once while trimming.
    #[serde(default = "default_cleanup_concurrency")]
    pub cleanup_concurrency: usize,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for VersionSettings {
    fn default() -> Self {
        Self {
            max_versions: default_max_versions(),
            cleanup_concurrency: default_cleanup_concurrency(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl VersionSettings {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

fn default_max_versions() -> usize {
    50
}

fn default_cleanup_concurrency() -> usize {
    5
}

fn default_cleanup_interval() -> u64 {
    3600
}

/// Audit log retention and significance policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default = "default_audit_max_age_days")]
    pub max_age_days: i64,

    /// Hard cap on in-memory entries.
    #[serde(default = "default_audit_max_entries")]
    pub max_entries: usize,

    /// Edits at or beneath these paths are always significant.
    #[serde(default = "default_sensitive_paths")]
    pub sensitive_paths: Vec<String>,

    /// Relative numeric change that must be strictly exceeded to be significant.
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Durable write attempts before falling back to the append log.
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            max_age_days: default_audit_max_age_days(),
            max_entries: default_audit_max_entries(),
            sensitive_paths: default_sensitive_paths(),
            significance_threshold: default_significance_threshold(),
            sweep_interval_secs: default_sweep_interval(),
            persist_retries: default_persist_retries(),
        }
    }
}

impl AuditSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_audit_max_age_days() -> i64 {
    90
}

fn default_audit_max_entries() -> usize {
    10_000
}

fn default_sensitive_paths() -> Vec<String> {
    vec![
        "model.name".to_string(),
        "bot.owner_ids".to_string(),
        "safety".to_string(),
    ]
}

fn default_significance_threshold() -> f64 {
    0.5
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_persist_retries() -> u32 {
    3
}

/// Health polling and alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum spacing between two alerts of the same kind.
    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown_secs: u64,

    /// Resident memory, as a percentage of host memory, that degrades health.
    #[serde(default = "default_memory_degraded_pct")]
    pub memory_degraded_pct: f64,

    #[serde(default = "default_memory_unhealthy_pct")]
    pub memory_unhealthy_pct: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            alert_cooldown_secs: default_alert_cooldown(),
            memory_degraded_pct: default_memory_degraded_pct(),
            memory_unhealthy_pct: default_memory_unhealthy_pct(),
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn alert_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.alert_cooldown_secs as i64)
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_alert_cooldown() -> u64 {
    300
}

fn default_memory_degraded_pct() -> f64 {
    80.0
}

fn default_memory_unhealthy_pct() -> f64 {
    95.0
}

/// File watching for hot reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSettings {
    #[serde(default = "default_watch_enabled")]
    pub enabled: bool,

    /// Stability window; writes inside it coalesce into one reload.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: default_watch_enabled(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl WatcherSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_watch_enabled() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    500
}
