//! Classification of audit entries that need operator attention.

use super::entry::{AuditAction, AuditDraft};
use crate::config::{AuditSettings, ConfigPath};
use serde_json::Value;
use tracing::warn;

/// Decides whether an entry is significant.
///
/// - Rollback and import are always significant.
/// - A change at, beneath, or covering a sensitive path is significant. For
///   whole-snapshot entries the sensitive leaves are compared between the
///   before and after values.
/// - A numeric change whose relative size strictly exceeds the threshold is
///   significant. Exactly at the threshold is not. A change away from zero is
///   always significant.
#[derive(Debug, Clone)]
pub struct SignificancePolicy {
    sensitive: Vec<ConfigPath>,
    threshold: f64,
}

impl SignificancePolicy {
    pub fn new(sensitive: Vec<ConfigPath>, threshold: f64) -> Self {
        Self {
            sensitive,
            threshold,
        }
    }

    pub fn from_settings(settings: &AuditSettings) -> Self {
        let sensitive = settings
            .sensitive_paths
            .iter()
            .filter_map(|raw| match ConfigPath::parse(raw) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Ignoring sensitive path: {}", e);
                    None
                }
            })
            .collect();
        Self::new(sensitive, settings.significance_threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_significant(&self, draft: &AuditDraft) -> bool {
        if matches!(draft.action, AuditAction::Rollback | AuditAction::Import) {
            return true;
        }
        let path = draft.path.clone().unwrap_or_else(ConfigPath::root);
        if self.touches_sensitive(&path, draft.before.as_ref(), draft.after.as_ref()) {
            return true;
        }
        match (&draft.before, &draft.after) {
            (Some(before), Some(after)) => self.numeric_exceeds(before, after),
            _ => false,
        }
    }

    fn touches_sensitive(&self, path: &ConfigPath, before: Option<&Value>, after: Option<&Value>) -> bool {
        self.sensitive.iter().any(|sensitive| {
            if path.starts_with(sensitive) {
                return true;
            }
            if !sensitive.starts_with(path) {
                return false;
            }
            // The entry covers the sensitive path; compare the leaves beneath it.
            let rest = ConfigPath::new(sensitive.segments()[path.segments().len()..].to_vec());
            let b = before.and_then(|v| rest.lookup(v));
            let a = after.and_then(|v| rest.lookup(v));
            b != a
        })
    }

    fn numeric_exceeds(&self, before: &Value, after: &Value) -> bool {
        match (before.as_f64(), after.as_f64()) {
            (Some(b), Some(a)) => relative_change(b, a).is_some_and(|change| change > self.threshold),
            _ => false,
        }
    }
}

/// `|after - before| / |before|`. Infinite when leaving zero, `None` for no change.
pub fn relative_change(before: f64, after: f64) -> Option<f64> {
    if before == after {
        return None;
    }
    if before == 0.0 {
        return Some(f64::INFINITY);
    }
    Some((after - before).abs() / before.abs())
}
