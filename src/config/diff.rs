//! Leaf-by-leaf comparison of configuration snapshots.
//!
//! Objects are walked recursively; lists and scalars are leaves. The `meta`
//! section holds version bookkeeping and is never part of a diff.

use super::path::ConfigPath;
use super::types::BotConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Root-level keys excluded from diffs and content hashes.
pub const BOOKKEEPING_KEYS: &[&str] = &["meta"];

/// One changed leaf.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathDiff {
    pub path: ConfigPath,
    /// Previous value, `Null` when the leaf was added.
    pub before: Value,
    /// New value, `Null` when the leaf was removed.
    pub after: Value,
}

impl PathDiff {
    pub fn kind(&self) -> ChangeKind {
        match (&self.before, &self.after) {
            (Value::Null, _) => ChangeKind::Added,
            (_, Value::Null) => ChangeKind::Removed,
            _ => ChangeKind::Modified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// Complete diff between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigDiff {
    pub source_label: String,
    pub target_label: String,
    pub changes: Vec<PathDiff>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Distinct sections touched by this diff.
    pub fn sections(&self) -> BTreeSet<&str> {
        self.changes.iter().filter_map(|c| c.path.section()).collect()
    }
}

impl fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            writeln!(f, "No differences found.")?;
            return Ok(());
        }

        writeln!(f, "Diff: {} -> {}", self.source_label, self.target_label)?;
        writeln!(f, "{}", "=".repeat(60))?;
        for change in &self.changes {
            let marker = match change.kind() {
                ChangeKind::Added => '+',
                ChangeKind::Removed => '-',
                ChangeKind::Modified => '~',
            };
            writeln!(
                f,
                "  {} {}: {} -> {}",
                marker, change.path, change.before, change.after
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Summary: {} total changes", self.len())?;
        Ok(())
    }
}

/// Diff two snapshots.
pub fn diff_configs(before: &BotConfig, after: &BotConfig) -> ConfigDiff {
    let before_value = serde_json::to_value(before).unwrap_or(Value::Null);
    let after_value = serde_json::to_value(after).unwrap_or(Value::Null);
    ConfigDiff {
        source_label: before.version_label().to_string(),
        target_label: after.version_label().to_string(),
        changes: diff_values(&before_value, &after_value),
    }
}

/// Diff two JSON trees, skipping bookkeeping keys at the root.
pub fn diff_values(before: &Value, after: &Value) -> Vec<PathDiff> {
    let mut changes = Vec::new();
    walk(&ConfigPath::root(), before, after, &mut changes);
    changes
}

fn walk(path: &ConfigPath, before: &Value, after: &Value, out: &mut Vec<PathDiff>) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            let keys: BTreeSet<&String> = b.keys().chain(a.keys()).collect();
            for key in keys {
                if path.is_root() && BOOKKEEPING_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let child = path.child(key.clone());
                let b_val = b.get(key).unwrap_or(&Value::Null);
                let a_val = a.get(key).unwrap_or(&Value::Null);
                walk(&child, b_val, a_val, out);
            }
        }
        // A section appearing or vanishing reports each of its leaves.
        (Value::Object(b), Value::Null) => {
            walk(path, &Value::Object(b.clone()), &Value::Object(Default::default()), out)
        }
        (Value::Null, Value::Object(a)) => {
            walk(path, &Value::Object(Default::default()), &Value::Object(a.clone()), out)
        }
        (b, a) if b != a => out.push(PathDiff {
            path: path.clone(),
            before: b.clone(),
            after: a.clone(),
        }),
        _ => {}
    }
}
