//! Loads candidate snapshots from the backing store.
//!
//! A candidate is the persisted document, or the built-in defaults when no
//! document exists, overlaid with recognized `BOT_*` environment overrides.
//! Defaults fill missing fields only inside sections the document declares;
//! a section the document omits stays missing so the validator rejects it.
//! The result is unvalidated; callers run it through the validator.

use super::loader::parse_bool;
use super::merge::{deep_merge_all, set_at_path};
use super::path::ConfigPath;
use super::types::BotConfig;
use crate::env::ProcessEnv;
use crate::error::{ConfigError, ConfigResult};
use crate::store;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverrideKind {
    Text,
    Integer,
    Float,
    Flag,
}

/// Environment variables recognized as configuration overrides.
const ENV_OVERRIDES: &[(&str, &str, OverrideKind)] = &[
    ("BOT_NAME", "bot.name", OverrideKind::Text),
    ("BOT_COMMAND_PREFIX", "bot.command_prefix", OverrideKind::Text),
    ("BOT_MODEL", "model.name", OverrideKind::Text),
    ("BOT_TEMPERATURE", "model.temperature", OverrideKind::Float),
    ("BOT_MAX_TOKENS", "model.max_tokens", OverrideKind::Integer),
    ("BOT_RATE_LIMIT_PER_MINUTE", "rate_limits.per_user_per_minute", OverrideKind::Integer),
    ("BOT_RATE_LIMIT_PER_DAY", "rate_limits.per_user_per_day", OverrideKind::Integer),
    ("BOT_CACHE_ENABLED", "cache.enabled", OverrideKind::Flag),
    ("BOT_CACHE_TTL_SECONDS", "cache.ttl_seconds", OverrideKind::Integer),
    ("BOT_REQUEST_TIMEOUT_MS", "timeouts.request_ms", OverrideKind::Integer),
    ("BOT_CONTENT_FILTER", "safety.content_filter", OverrideKind::Flag),
];

/// Where a candidate's base layer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// No persisted document; built-in defaults only.
    Defaults,
    /// The persisted document, with defaults for fields it leaves out.
    Persisted,
}

/// An unvalidated, merged candidate.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub value: Value,
    pub source: CandidateSource,
    /// Environment variables that contributed an override.
    pub overrides: Vec<String>,
}

/// Reads and writes the current snapshot document.
#[derive(Clone)]
pub struct SnapshotLoader {
    path: PathBuf,
    env: Arc<dyn ProcessEnv>,
}

impl SnapshotLoader {
    pub fn new(path: impl Into<PathBuf>, env: Arc<dyn ProcessEnv>) -> Self {
        Self {
            path: path.into(),
            env,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a merged candidate.
    ///
    /// Malformed persisted data is a `Parse` error, never silently replaced
    /// by defaults.
    pub fn load(&self) -> ConfigResult<Candidate> {
        let defaults = serde_json::to_value(BotConfig::default())
            .map_err(|e| ConfigError::parse(&self.path, e))?;

        let (mut layers, source) = match self.read_persisted()? {
            Some(persisted) => (
                vec![declared_sections(defaults, &persisted), persisted],
                CandidateSource::Persisted,
            ),
            None => (vec![defaults], CandidateSource::Defaults),
        };

        let (overrides_value, overrides) = self.env_overrides();
        layers.push(overrides_value);

        debug!(
            path = %self.path.display(),
            source = ?source,
            overrides = overrides.len(),
            "Loaded configuration candidate"
        );

        Ok(Candidate {
            value: deep_merge_all(layers),
            source,
            overrides,
        })
    }

    /// Read the persisted document as a JSON tree. `Ok(None)` when absent or empty.
    pub fn read_persisted(&self) -> ConfigResult<Option<Value>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::persistence(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        let value: Value =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::parse(&self.path, e))?;
        match value {
            Value::Null => Ok(None),
            Value::Object(_) => Ok(Some(value)),
            _ => Err(ConfigError::parse(
                &self.path,
                "top level must be a mapping of sections",
            )),
        }
    }

    /// Atomically persist a snapshot as the current document.
    pub fn persist(&self, config: &BotConfig) -> ConfigResult<()> {
        store::write_yaml(&self.path, config)
    }

    /// Collect recognized environment overrides as a partial document.
    pub fn env_overrides(&self) -> (Value, Vec<String>) {
        let mut partial = Value::Object(Map::new());
        let mut applied = Vec::new();

        for (var, dotted, kind) in ENV_OVERRIDES {
            let Some(raw) = self.env.var(var) else {
                continue;
            };
            let Some(value) = parse_override(&raw, *kind) else {
                warn!(var = %var, value = %raw, "Ignoring unparsable configuration override");
                continue;
            };
            let Ok(path) = ConfigPath::parse(dotted) else {
                continue;
            };
            if set_at_path(&mut partial, &path, value) {
                applied.push((*var).to_string());
            }
        }

        (partial, applied)
    }
}

fn parse_override(raw: &str, kind: OverrideKind) -> Option<Value> {
    let raw = raw.trim();
    match kind {
        OverrideKind::Text => (!raw.is_empty()).then(|| Value::String(raw.to_string())),
        OverrideKind::Integer => raw.parse::<u64>().ok().map(Value::from),
        OverrideKind::Float => raw
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::from),
        OverrideKind::Flag => parse_bool(raw).map(Value::Bool),
    }
}

/// The default sections the persisted document also declares.
fn declared_sections(defaults: Value, persisted: &Value) -> Value {
    match (defaults, persisted) {
        (Value::Object(mut sections), Value::Object(declared)) => {
            sections.retain(|name, _| declared.contains_key(name));
            Value::Object(sections)
        }
        (defaults, _) => defaults,
    }
}
