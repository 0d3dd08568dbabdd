//! Bot configuration schema.
//!
//! A [`BotConfig`] is one complete snapshot. Every section carries built-in
//! defaults so an empty document deserializes to a valid configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Section names every candidate document must provide.
pub const REQUIRED_SECTIONS: &[&str] = &[
    "bot",
    "model",
    "rate_limits",
    "cache",
    "features",
    "persona",
    "timeouts",
    "safety",
];

/// Capabilities the bot cannot run without.
pub const REQUIRED_CAPABILITIES: &[&str] = &["chat"];

/// A complete configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BotConfig {
    /// Version bookkeeping. Excluded from content hashes and diffs.
    #[serde(default)]
    pub meta: SnapshotMeta,

    #[serde(default)]
    pub bot: BotSection,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub features: FeaturesConfig,

    #[serde(default)]
    pub persona: PersonaConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub safety: SafetyConfig,
}

impl BotConfig {
    /// Whether a capability is listed in `features.enabled`.
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.enabled.iter().any(|f| f == name)
    }

    /// Return a copy relabelled with new version metadata.
    pub fn relabelled(&self, version: &str, updated_by: &str) -> Self {
        let mut next = self.clone();
        next.meta = SnapshotMeta {
            version: Some(version.to_string()),
            updated_at: Some(Utc::now()),
            updated_by: Some(updated_by.to_string()),
        };
        next
    }

    /// Version id of this snapshot, or `"unversioned"`.
    pub fn version_label(&self) -> &str {
        self.meta.version.as_deref().unwrap_or("unversioned")
    }
}

/// Version metadata attached to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SnapshotMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

/// Bot identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSection {
    #[serde(default = "default_bot_name")]
    pub name: String,

    /// Prefix that marks a chat message as a command.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Platform user ids allowed to run admin commands.
    #[serde(default)]
    pub owner_ids: Vec<String>,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            command_prefix: default_command_prefix(),
            owner_ids: Vec::new(),
        }
    }
}

fn default_bot_name() -> String {
    "assistant".to_string()
}

fn default_command_prefix() -> String {
    "!".to_string()
}

/// Language model request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Sampling temperature, within [0, 2].
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Nucleus sampling mass, within [0, 1].
    #[serde(default = "default_top_p")]
    pub top_p: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_model_name() -> String {
    "claude-sonnet".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    1024
}

/// Request rate limits applied by the downstream rate limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_minute")]
    pub per_user_per_minute: u32,

    #[serde(default = "default_per_day")]
    pub per_user_per_day: u32,

    #[serde(default = "default_global_per_minute")]
    pub global_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_user_per_minute: default_per_minute(),
            per_user_per_day: default_per_day(),
            global_per_minute: default_global_per_minute(),
        }
    }
}

fn default_per_minute() -> u32 {
    10
}

fn default_per_day() -> u32 {
    500
}

fn default_global_per_minute() -> u32 {
    120
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,

    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_entries() -> u64 {
    10_000
}

/// Enabled bot capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_features")]
    pub enabled: Vec<String>,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            enabled: default_features(),
        }
    }
}

fn default_features() -> Vec<String> {
    vec![
        "chat".to_string(),
        "memory".to_string(),
        "personality".to_string(),
    ]
}

/// Persona engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,

    #[serde(default = "default_persona_style")]
    pub style: String,

    /// Conversation turns kept as context.
    #[serde(default = "default_max_history")]
    pub max_history: u32,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            style: default_persona_style(),
            max_history: default_max_history(),
        }
    }
}

fn default_persona_name() -> String {
    "default".to_string()
}

fn default_persona_style() -> String {
    "friendly".to_string()
}

fn default_max_history() -> u32 {
    20
}

/// Network timeouts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,

    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_ms(),
            connect_ms: default_connect_ms(),
        }
    }
}

fn default_request_ms() -> u64 {
    30_000
}

fn default_connect_ms() -> u64 {
    5_000
}

/// Content safety settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_true")]
    pub content_filter: bool,

    #[serde(default)]
    pub blocked_terms: Vec<String>,

    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            content_filter: true,
            blocked_terms: Vec::new(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

fn default_max_message_chars() -> u32 {
    4000
}

fn default_true() -> bool {
    true
}
