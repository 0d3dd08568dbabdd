use crate::config::ConfigPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// What kind of operation produced an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A section update through the API.
    Update,
    /// A change picked up by reloading the backing store.
    Reload,
    Save,
    Rollback,
    Import,
    Export,
    Reset,
    Migrate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Update => "update",
            AuditAction::Reload => "reload",
            AuditAction::Save => "save",
            AuditAction::Rollback => "rollback",
            AuditAction::Import => "import",
            AuditAction::Export => "export",
            AuditAction::Reset => "reset",
            AuditAction::Migrate => "migrate",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "update" => Ok(AuditAction::Update),
            "reload" => Ok(AuditAction::Reload),
            "save" => Ok(AuditAction::Save),
            "rollback" => Ok(AuditAction::Rollback),
            "import" => Ok(AuditAction::Import),
            "export" => Ok(AuditAction::Export),
            "reset" => Ok(AuditAction::Reset),
            "migrate" => Ok(AuditAction::Migrate),
            _ => Err(format!(
                "Invalid action '{}'. Valid options: update, reload, save, rollback, import, export, reset, migrate",
                s
            )),
        }
    }
}

/// An immutable audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    /// Changed path; `None` for whole-snapshot entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<ConfigPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub significant: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Everything about an entry except what the auditor assigns
/// (id, timestamp, significance).
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub action: AuditAction,
    pub path: Option<ConfigPath>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub actor: String,
    pub reason: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl AuditDraft {
    pub fn new(action: AuditAction, actor: impl Into<String>) -> Self {
        Self {
            action,
            path: None,
            before: None,
            after: None,
            actor: actor.into(),
            reason: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn path(mut self, path: ConfigPath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn change(mut self, before: Value, after: Value) -> Self {
        self.before = Some(before);
        self.after = Some(after);
        self
    }

    pub fn reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.map(str::to_string);
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub(crate) fn into_entry(self, significant: bool) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: self.action,
            path: self.path,
            before: self.before,
            after: self.after,
            actor: self.actor,
            reason: self.reason,
            significant,
            metadata: self.metadata,
        }
    }
}
