//! Aggregations over audit entries and compliance derivations.
//!
//! Both are pure functions of their inputs and hold no state of their own.

use super::entry::{AuditAction, AuditEntry};
use crate::config::BotConfig;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Most-changed paths reported in analytics.
const TOP_PATHS: usize = 10;

/// Rollbacks within a day above which configuration is considered churning.
const ROLLBACK_CHURN_LIMIT: usize = 3;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditAnalytics {
    pub total: usize,
    pub significant: usize,
    pub by_action: BTreeMap<AuditAction, usize>,
    pub by_actor: BTreeMap<String, usize>,
    /// Paths ordered by change count, descending.
    pub top_paths: Vec<(String, usize)>,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    /// Average entries per day across the covered span.
    pub changes_per_day: f64,
}

pub fn analyze(entries: &[AuditEntry]) -> AuditAnalytics {
    let mut analytics = AuditAnalytics {
        total: entries.len(),
        ..Default::default()
    };
    let mut paths: BTreeMap<String, usize> = BTreeMap::new();

    for entry in entries {
        if entry.significant {
            analytics.significant += 1;
        }
        *analytics.by_action.entry(entry.action).or_default() += 1;
        *analytics.by_actor.entry(entry.actor.clone()).or_default() += 1;
        if let Some(path) = &entry.path {
            *paths.entry(path.to_string()).or_default() += 1;
        }
        analytics.first = Some(analytics.first.map_or(entry.timestamp, |t| t.min(entry.timestamp)));
        analytics.last = Some(analytics.last.map_or(entry.timestamp, |t| t.max(entry.timestamp)));
    }

    let mut top: Vec<(String, usize)> = paths.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top.truncate(TOP_PATHS);
    analytics.top_paths = top;

    if let (Some(first), Some(last)) = (analytics.first, analytics.last) {
        let days = ((last - first).num_seconds() as f64 / 86_400.0).max(1.0);
        analytics.changes_per_day = analytics.total as f64 / days;
    }
    analytics
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceFinding {
    pub rule: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub compliant: bool,
    pub findings: Vec<ComplianceFinding>,
}

impl ComplianceReport {
    pub fn failures(&self) -> impl Iterator<Item = &ComplianceFinding> {
        self.findings.iter().filter(|f| !f.passed)
    }
}

/// Derive a compliance verdict from the live snapshot and the audit trail.
pub fn compliance_check(snapshot: &BotConfig, entries: &[AuditEntry], now: DateTime<Utc>) -> ComplianceReport {
    let mut findings = Vec::new();

    findings.push(ComplianceFinding {
        rule: "content_filter_enabled",
        passed: snapshot.safety.content_filter,
        detail: if snapshot.safety.content_filter {
            "content filter is on".to_string()
        } else {
            "content filter is disabled".to_string()
        },
    });

    let owners = snapshot.bot.owner_ids.len();
    findings.push(ComplianceFinding {
        rule: "owners_configured",
        passed: owners > 0,
        detail: format!("{} owner id(s) configured", owners),
    });

    findings.push(ComplianceFinding {
        rule: "snapshot_versioned",
        passed: snapshot.meta.version.is_some(),
        detail: format!("current version: {}", snapshot.version_label()),
    });

    let unexplained = entries
        .iter()
        .filter(|e| e.significant && e.reason.as_deref().is_none_or(|r| r.trim().is_empty()))
        .count();
    findings.push(ComplianceFinding {
        rule: "significant_changes_explained",
        passed: unexplained == 0,
        detail: format!("{} significant change(s) without a reason", unexplained),
    });

    let day_ago = now - Duration::hours(24);
    let rollbacks = entries
        .iter()
        .filter(|e| e.action == AuditAction::Rollback && e.timestamp >= day_ago)
        .count();
    findings.push(ComplianceFinding {
        rule: "rollback_churn",
        passed: rollbacks < ROLLBACK_CHURN_LIMIT,
        detail: format!("{} rollback(s) in the last 24h", rollbacks),
    });

    ComplianceReport {
        compliant: findings.iter().all(|f| f.passed),
        findings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditDraft;
    use crate::config::ConfigPath;

    fn entry(action: AuditAction, path: Option<&str>, significant: bool, reason: Option<&str>) -> AuditEntry {
        let mut draft = AuditDraft::new(action, "alice").reason(reason);
        if let Some(path) = path {
            draft = draft.path(ConfigPath::parse(path).unwrap());
        }
        draft.into_entry(significant)
    }

    #[test]
    fn test_analyze_counts() {
        let entries = vec![
            entry(AuditAction::Reload, Some("cache.ttl_seconds"), false, None),
            entry(AuditAction::Reload, Some("cache.ttl_seconds"), false, None),
            entry(AuditAction::Update, Some("model.name"), true, Some("upgrade")),
            entry(AuditAction::Save, None, false, None),
        ];
        let a = analyze(&entries);
        assert_eq!(a.total, 4);
        assert_eq!(a.significant, 1);
        assert_eq!(a.by_action[&AuditAction::Reload], 2);
        assert_eq!(a.by_actor["alice"], 4);
        assert_eq!(a.top_paths[0], ("cache.ttl_seconds".to_string(), 2));
        assert!(a.first.is_some() && a.last.is_some());
    }

    #[test]
    fn test_analyze_empty() {
        let a = analyze(&[]);
        assert_eq!(a.total, 0);
        assert!(a.first.is_none());
        assert_eq!(a.changes_per_day, 0.0);
    }

    #[test]
    fn test_compliance_flags_gaps() {
        let snapshot = BotConfig::default();
        let entries = vec![
            entry(AuditAction::Rollback, None, true, None),
            entry(AuditAction::Rollback, None, true, Some("bad deploy")),
            entry(AuditAction::Rollback, None, true, Some("bad deploy")),
        ];
        let report = compliance_check(&snapshot, &entries, Utc::now());
        assert!(!report.compliant);
        let failed: Vec<&str> = report.failures().map(|f| f.rule).collect();
        assert!(failed.contains(&"owners_configured"));
        assert!(failed.contains(&"snapshot_versioned"));
        assert!(failed.contains(&"significant_changes_explained"));
        assert!(failed.contains(&"rollback_churn"));
        assert!(!failed.contains(&"content_filter_enabled"));
    }

    #[test]
    fn test_compliance_passes_for_clean_setup() {
        let mut snapshot = BotConfig::default().relabelled("v000000000000001", "ops");
        snapshot.bot.owner_ids = vec!["1234".to_string()];
        let report = compliance_check(&snapshot, &[], Utc::now());
        assert!(report.compliant, "{:?}", report.findings);
    }
}
