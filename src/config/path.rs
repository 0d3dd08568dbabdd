//! Typed configuration paths.
//!
//! A [`ConfigPath`] is a list of segments such as `["rate_limits", "per_user_per_minute"]`.
//! Paths resolve against the schema, which is the shape of the built-in
//! defaults: a path the schema does not know is an error, never a silent miss.

use super::types::BotConfig;
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ConfigPath(Vec<String>);

impl ConfigPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// The empty path (the whole document).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse dotted notation. Empty segments are rejected.
    pub fn parse(dotted: &str) -> ConfigResult<Self> {
        if dotted.is_empty() {
            return Ok(Self::root());
        }
        let segments: Vec<String> = dotted.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::UnknownPath {
                path: dotted.to_string(),
            });
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a segment, returning the child path.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// True when `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &ConfigPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Section name (first segment), if any.
    pub fn section(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Look up this path inside an arbitrary JSON tree.
    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.0 {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Whether the schema defines this path.
    ///
    /// Lists are leaves in the schema: indexing into one is only valid for
    /// numeric segments.
    pub fn is_known(&self) -> bool {
        let mut current = schema();
        for segment in &self.0 {
            current = match current {
                Value::Object(map) => match map.get(segment) {
                    Some(v) => v,
                    None => return false,
                },
                Value::Array(_) => return segment.parse::<usize>().is_ok(),
                _ => return false,
            };
        }
        true
    }

    /// Resolve against a snapshot.
    ///
    /// Unknown paths fail with `UnknownPath`. A known path that is absent from
    /// the value (for example an out-of-range list index) resolves to `Null`.
    pub fn resolve(&self, config: &BotConfig) -> ConfigResult<Value> {
        if !self.is_known() {
            return Err(ConfigError::UnknownPath {
                path: self.to_string(),
            });
        }
        let tree = serde_json::to_value(config).map_err(|e| ConfigError::invalid("", e.to_string()))?;
        Ok(self.lookup(&tree).cloned().unwrap_or(Value::Null))
    }

    /// Resolve, falling back to `default` for an unknown path.
    pub fn resolve_or(&self, config: &BotConfig, default: Value) -> Value {
        self.resolve(config).unwrap_or(default)
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<ConfigPath> for String {
    fn from(path: ConfigPath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for ConfigPath {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ConfigPath::parse(&value)
    }
}

impl std::str::FromStr for ConfigPath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigPath::parse(s)
    }
}

/// The schema tree: the serialized built-in defaults.
fn schema() -> &'static Value {
    static SCHEMA: OnceLock<Value> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let mut value = serde_json::to_value(BotConfig::default()).unwrap_or(Value::Null);
        // Meta fields are optional and skipped when empty; spell them out.
        if let Some(meta) = value.get_mut("meta").and_then(Value::as_object_mut) {
            for key in ["version", "updated_at", "updated_by"] {
                meta.entry(key).or_insert(Value::Null);
            }
        }
        value
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        let path = ConfigPath::parse("rate_limits.per_user_per_minute").unwrap();
        assert_eq!(path.segments().len(), 2);
        assert_eq!(path.section(), Some("rate_limits"));
        assert_eq!(path.to_string(), "rate_limits.per_user_per_minute");
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!(ConfigPath::parse("model..name").is_err());
        assert!(ConfigPath::parse(".model").is_err());
        assert!(ConfigPath::parse("").unwrap().is_root());
    }

    #[test]
    fn test_resolve_known_path() {
        let config = BotConfig::default();
        let path = ConfigPath::parse("model.temperature").unwrap();
        assert_eq!(path.resolve(&config).unwrap(), json!(0.7));
    }

    #[test]
    fn test_resolve_unknown_path_is_error() {
        let config = BotConfig::default();
        let path = ConfigPath::parse("model.frequency_penalty").unwrap();
        assert!(matches!(
            path.resolve(&config),
            Err(ConfigError::UnknownPath { .. })
        ));
        assert_eq!(path.resolve_or(&config, json!(0)), json!(0));
    }

    #[test]
    fn test_meta_paths_are_known_even_when_unset() {
        let config = BotConfig::default();
        let path = ConfigPath::parse("meta.version").unwrap();
        assert_eq!(path.resolve(&config).unwrap(), Value::Null);
    }

    #[test]
    fn test_list_index_paths() {
        let config = BotConfig::default();
        let first = ConfigPath::parse("features.enabled.0").unwrap();
        assert_eq!(first.resolve(&config).unwrap(), json!("chat"));
        let past_end = ConfigPath::parse("features.enabled.99").unwrap();
        assert_eq!(past_end.resolve(&config).unwrap(), Value::Null);
        assert!(!ConfigPath::parse("features.enabled.x").unwrap().is_known());
    }

    #[test]
    fn test_starts_with() {
        let parent = ConfigPath::parse("safety").unwrap();
        let child = ConfigPath::parse("safety.content_filter").unwrap();
        assert!(child.starts_with(&parent));
        assert!(!parent.starts_with(&child));
        assert!(!ConfigPath::parse("safety_extra").unwrap().starts_with(&parent));
    }

    #[test]
    fn test_serde_as_dotted_string() {
        let path = ConfigPath::parse("cache.enabled").unwrap();
        assert_eq!(serde_json::to_value(&path).unwrap(), json!("cache.enabled"));
        let back: ConfigPath = serde_json::from_value(json!("cache.enabled")).unwrap();
        assert_eq!(back, path);
    }
}
