//! Service settings loader with tier-based merging.
//!
//! Loads settings from multiple tiers and merges them field-by-field.

use super::merge::deep_merge_all;
use super::settings::ServiceSettings;
use crate::env::ProcessEnv;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name looked up in each tier directory.
pub const SETTINGS_FILE: &str = "settings.yaml";

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    /// Built-in defaults (lowest priority)
    Defaults = 0,
    /// Project-level settings ($CWD/config-sentinel/)
    Project = 1,
    /// User-level settings (~/.config-sentinel/)
    User = 2,
    /// Environment variables (highest priority)
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories for each settings tier.
#[derive(Debug, Clone)]
pub struct SettingsPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl SettingsPaths {
    /// Discover tier directories from the environment and defaults.
    pub fn discover(env: &dyn ProcessEnv) -> Self {
        let user_dir = env
            .var("SENTINEL_USER_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config-sentinel")));

        let project_dir = env
            .var("SENTINEL_PROJECT_DIR")
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("config-sentinel")));

        Self {
            project_dir,
            user_dir,
        }
    }

    /// Create paths with explicit directories.
    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }
}

/// Loads [`ServiceSettings`] across tiers.
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    pub paths: SettingsPaths,
    settings: ServiceSettings,
    /// Settings files that contributed, lowest tier first.
    sources: Vec<(ConfigTier, PathBuf)>,
}

impl SettingsLoader {
    /// Load settings with discovered paths.
    pub fn load(env: &dyn ProcessEnv) -> Result<Self> {
        Self::load_with_paths(SettingsPaths::discover(env), env)
    }

    /// Load settings with explicit paths.
    pub fn load_with_paths(paths: SettingsPaths, env: &dyn ProcessEnv) -> Result<Self> {
        // An explicit settings file replaces tier discovery.
        if let Some(explicit) = env.var("SENTINEL_SETTINGS_PATH") {
            let path = PathBuf::from(explicit);
            let explicit_value = read_yaml_value(&path)?
                .with_context(|| format!("Settings file not found: {}", path.display()))?;
            let merged = deep_merge_all([to_value(&ServiceSettings::default())?, explicit_value]);
            let mut settings: ServiceSettings = serde_json::from_value(merged)
                .with_context(|| format!("Invalid settings in {}", path.display()))?;
            Self::apply_env_overrides(&mut settings, env);
            return Ok(Self {
                paths,
                settings,
                sources: vec![(ConfigTier::Project, path)],
            });
        }

        let mut values: Vec<Value> = vec![to_value(&ServiceSettings::default())?];
        let mut sources = Vec::new();

        for (tier, dir) in [
            (ConfigTier::Project, paths.project_dir.as_deref()),
            (ConfigTier::User, paths.user_dir.as_deref()),
        ] {
            let Some(dir) = dir else { continue };
            let file = dir.join(SETTINGS_FILE);
            match read_yaml_value(&file) {
                Ok(Some(value)) => {
                    debug!(tier = %tier, path = %file.display(), "Loaded settings tier");
                    values.push(value);
                    sources.push((tier, file));
                }
                Ok(None) => {}
                Err(e) => warn!(tier = %tier, "Skipping unreadable settings file: {:#}", e),
            }
        }

        let merged = deep_merge_all(values);
        let mut settings: ServiceSettings =
            serde_json::from_value(merged).context("Invalid service settings")?;

        Self::apply_env_overrides(&mut settings, env);

        Ok(Self {
            paths,
            settings,
            sources,
        })
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(settings: &mut ServiceSettings, env: &dyn ProcessEnv) {
        if let Some(data_dir) = env.var("SENTINEL_DATA_DIR") {
            settings.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Some(deployment) = env.var("SENTINEL_DEPLOYMENT") {
            match deployment.parse() {
                Ok(d) => settings.deployment = d,
                Err(e) => warn!("Ignoring SENTINEL_DEPLOYMENT: {}", e),
            }
        }

        if let Some(interval) = env.var("SENTINEL_POLL_INTERVAL_SECS") {
            match interval.parse() {
                Ok(secs) => settings.monitor.poll_interval_secs = secs,
                Err(_) => warn!("Ignoring SENTINEL_POLL_INTERVAL_SECS={}: not a number", interval),
            }
        }

        if let Some(watch) = env.var("SENTINEL_WATCH") {
            match parse_bool(&watch) {
                Some(enabled) => settings.watcher.enabled = enabled,
                None => warn!("Ignoring SENTINEL_WATCH={}: not a boolean", watch),
            }
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ServiceSettings {
        &mut self.settings
    }

    pub fn into_settings(self) -> ServiceSettings {
        self.settings
    }

    /// Settings files that contributed, lowest tier first.
    pub fn sources(&self) -> &[(ConfigTier, PathBuf)] {
        &self.sources
    }
}

/// Parse the usual spellings of a boolean flag.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn to_value(settings: &ServiceSettings) -> Result<Value> {
    serde_json::to_value(settings).context("Failed to serialize default settings")
}

/// Read a YAML file as a JSON tree. `Ok(None)` when the file is absent.
fn read_yaml_value(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_yaml::from_str::<Value>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}
