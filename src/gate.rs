//! Deployment gating.
//!
//! The gate decides whether the running configuration may serve traffic: a
//! hard stop at startup when critical checks fail in production, and a
//! composite readiness verdict that operators can inspect piece by piece.

use crate::audit::{AuditFilter, ComplianceReport};
use crate::config::{BotConfig, REQUIRED_CAPABILITIES, validate_config};
use crate::error::{ConfigError, ConfigResult};
use crate::monitor::checks::CREDENTIALS;
use crate::monitor::{AggregateHealth, HealthStatus};
use crate::orchestrator::Orchestrator;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Trailing window in which a significant change blocks readiness.
const STABILITY_WINDOW_MINUTES: i64 = 60;

pub const HEALTH_PASSING: &str = "health_checks_passing";
pub const NO_VALIDATION_ERRORS: &str = "no_validation_errors";
pub const STABLE: &str = "no_recent_significant_changes";
pub const CREDENTIALS_COMPLETE: &str = "credentials_and_features_complete";

/// Result of one readiness sub-check.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Composite production-readiness verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    /// AND of every sub-check.
    pub ready: bool,
    pub checks: Vec<ReadinessCheck>,
    pub checked_at: DateTime<Utc>,
}

impl ReadinessReport {
    fn from_checks(checks: Vec<ReadinessCheck>) -> Self {
        Self {
            ready: checks.iter().all(|c| c.passed),
            checks,
            checked_at: Utc::now(),
        }
    }

    pub fn check(&self, name: &str) -> Option<&ReadinessCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

pub struct HealthGate {
    orchestrator: Arc<Orchestrator>,
}

impl HealthGate {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run every health check once and vet the critical ones.
    ///
    /// In production an unhealthy critical check is a `StartupBlocked`
    /// error listing the failing checks; elsewhere it is logged and startup
    /// continues.
    pub fn startup_validation(&self) -> ConfigResult<AggregateHealth> {
        let config = self.orchestrator.get_snapshot()?;
        let monitor = self.orchestrator.monitor();
        let health = monitor.run_checks(&config);

        let failing: Vec<String> = health
            .results
            .iter()
            .filter(|r| r.status == HealthStatus::Unhealthy && monitor.is_critical(&r.name))
            .map(|r| r.name.clone())
            .collect();

        if failing.is_empty() {
            info!(status = %health.status, passed = health.passed, "Startup validation passed");
            return Ok(health);
        }

        let deployment = self.orchestrator.settings().deployment;
        if deployment.is_production() {
            error!(failing = ?failing, "Critical health checks failed, refusing to start");
            return Err(ConfigError::StartupBlocked { failing });
        }
        warn!(
            deployment = ?deployment,
            failing = ?failing,
            "Critical health checks failed, continuing outside production"
        );
        Ok(health)
    }

    pub fn production_readiness(&self) -> ConfigResult<ReadinessReport> {
        let config = self.orchestrator.get_snapshot()?;
        let health = self.orchestrator.monitor().run_checks(&config);
        Ok(self.readiness_for(&config, &health, Utc::now()))
    }

    fn readiness_for(&self, config: &BotConfig, health: &AggregateHealth, now: DateTime<Utc>) -> ReadinessReport {
        let mut checks = Vec::with_capacity(4);

        let failing: Vec<&str> = health.failing().map(|r| r.name.as_str()).collect();
        checks.push(ReadinessCheck {
            name: HEALTH_PASSING,
            passed: failing.is_empty(),
            detail: if failing.is_empty() {
                format!("{} check(s) passing", health.passed)
            } else {
                format!("failing: {}", failing.join(", "))
            },
        });

        let report = validate_config(config);
        checks.push(ReadinessCheck {
            name: NO_VALIDATION_ERRORS,
            passed: report.valid,
            detail: if report.valid {
                "configuration is valid".to_string()
            } else {
                report
                    .errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            },
        });

        let recent = self.orchestrator.auditor().query(&AuditFilter {
            since: Some(now - Duration::minutes(STABILITY_WINDOW_MINUTES)),
            significant: Some(true),
            ..Default::default()
        });
        checks.push(ReadinessCheck {
            name: STABLE,
            passed: recent.is_empty(),
            detail: match recent.first() {
                None => format!("no significant changes in the last {} minutes", STABILITY_WINDOW_MINUTES),
                Some(latest) => format!(
                    "{} significant change(s), latest {} by {} at {}",
                    recent.len(),
                    latest.action,
                    latest.actor,
                    latest.timestamp.to_rfc3339()
                ),
            },
        });

        let credentials_ok = health.result(CREDENTIALS).is_some_and(|r| r.is_healthy());
        let missing: Vec<&str> = REQUIRED_CAPABILITIES
            .iter()
            .copied()
            .filter(|f| !config.has_feature(f))
            .collect();
        let mut problems = Vec::new();
        if !credentials_ok {
            problems.push("credentials incomplete".to_string());
        }
        if !missing.is_empty() {
            problems.push(format!("missing features: {}", missing.join(", ")));
        }
        checks.push(ReadinessCheck {
            name: CREDENTIALS_COMPLETE,
            passed: problems.is_empty(),
            detail: if problems.is_empty() {
                "credentials present, required features enabled".to_string()
            } else {
                problems.join("; ")
            },
        });

        ReadinessReport::from_checks(checks)
    }

    /// Human-readable summary of health, readiness, audit analytics and
    /// compliance.
    pub fn report_generation(&self) -> ConfigResult<String> {
        let config = self.orchestrator.get_snapshot()?;
        let health = self.orchestrator.monitor().run_checks(&config);
        let readiness = self.readiness_for(&config, &health, Utc::now());
        let auditor = self.orchestrator.auditor();
        let analytics = auditor.analytics(&AuditFilter::default());
        let compliance = auditor.compliance_check(&config);
        Ok(render_report(&config, &health, &readiness, &analytics, &compliance))
    }
}

fn mark(passed: bool) -> &'static str {
    if passed { "PASS" } else { "FAIL" }
}

fn render_report(
    config: &BotConfig,
    health: &AggregateHealth,
    readiness: &ReadinessReport,
    analytics: &crate::audit::AuditAnalytics,
    compliance: &ComplianceReport,
) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(out, "Configuration report for {} ({})", config.bot.name, config.version_label());
    let _ = writeln!(out, "Generated {}", readiness.checked_at.to_rfc3339());

    let _ = writeln!(out, "\n## Health: {}", health.status);
    let _ = writeln!(out, "{} passed, {} failed", health.passed, health.failed);
    for result in &health.results {
        let _ = writeln!(out, "- [{}] {}: {}", result.status, result.name, result.message);
    }
    if !health.recommendations.is_empty() {
        let _ = writeln!(out, "\nRecommendations:");
        for recommendation in &health.recommendations {
            let _ = writeln!(out, "- {}", recommendation);
        }
    }

    let _ = writeln!(
        out,
        "\n## Production readiness: {}",
        if readiness.ready { "READY" } else { "NOT READY" }
    );
    for check in &readiness.checks {
        let _ = writeln!(out, "- [{}] {}: {}", mark(check.passed), check.name, check.detail);
    }

    let _ = writeln!(out, "\n## Audit");
    let _ = writeln!(out, "{} entries, {} significant", analytics.total, analytics.significant);
    if analytics.total > 0 {
        let _ = writeln!(out, "{:.1} changes per day", analytics.changes_per_day);
    }
    for (action, count) in &analytics.by_action {
        let _ = writeln!(out, "- {}: {}", action, count);
    }
    if !analytics.top_paths.is_empty() {
        let _ = writeln!(out, "Most changed paths:");
        for (path, count) in &analytics.top_paths {
            let _ = writeln!(out, "- {} ({})", path, count);
        }
    }

    let _ = writeln!(
        out,
        "\n## Compliance: {}",
        if compliance.compliant { "compliant" } else { "non-compliant" }
    );
    for finding in &compliance.findings {
        let _ = writeln!(out, "- [{}] {}: {}", mark(finding.passed), finding.rule, finding.detail);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Deployment, ServiceSettings};
    use crate::env::MapEnv;
    use crate::monitor::FixedProbe;
    use crate::monitor::checks::{MODEL_API_KEY_VAR, PLATFORM_TOKEN_VAR};
    use serde_json::json;
    use tempfile::TempDir;

    fn credentials() -> MapEnv {
        MapEnv::new()
            .with(PLATFORM_TOKEN_VAR, "abcdefghijklmnopqrstuvwxyz012345")
            .with(MODEL_API_KEY_VAR, "sk-abcdefghijklmnopqrstuvwxyz")
    }

    async fn gate(temp: &TempDir, deployment: Deployment, env: MapEnv) -> HealthGate {
        let mut settings = ServiceSettings::with_data_dir(temp.path());
        settings.watcher.enabled = false;
        settings.deployment = deployment;
        let orchestrator = Orchestrator::new(settings, Arc::new(env), Arc::new(FixedProbe::percent(10))).unwrap();
        orchestrator.initialize().await.unwrap();
        HealthGate::new(orchestrator)
    }

    #[tokio::test]
    async fn test_production_blocks_on_missing_credentials() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp, Deployment::Production, MapEnv::new()).await;
        match gate.startup_validation() {
            Err(ConfigError::StartupBlocked { failing }) => {
                assert_eq!(failing, vec![CREDENTIALS.to_string()]);
            }
            other => panic!("expected StartupBlocked, got {:?}", other.map(|h| h.status)),
        }
        gate.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_development_continues_on_missing_credentials() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp, Deployment::Development, MapEnv::new()).await;
        let health = gate.startup_validation().unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        gate.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_readiness_with_credentials() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp, Deployment::Production, credentials()).await;
        gate.startup_validation().unwrap();

        let report = gate.production_readiness().unwrap();
        assert!(report.check(NO_VALIDATION_ERRORS).unwrap().passed);
        assert!(report.check(STABLE).unwrap().passed);
        assert!(report.check(CREDENTIALS_COMPLETE).unwrap().passed);
        assert_eq!(report.ready, report.checks.iter().all(|c| c.passed));
        gate.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_significant_change_blocks_readiness() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp, Deployment::Production, credentials()).await;
        gate.orchestrator
            .update_section(json!({"safety": {"content_filter": false}}), "mallory", None)
            .await
            .unwrap();

        let report = gate.production_readiness().unwrap();
        let stable = report.check(STABLE).unwrap();
        assert!(!stable.passed);
        assert!(stable.detail.contains("mallory"));
        assert!(!report.ready);
        gate.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_report_sections() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp, Deployment::Development, credentials()).await;
        let report = gate.report_generation().unwrap();
        assert!(report.contains("## Health"));
        assert!(report.contains("## Production readiness"));
        assert!(report.contains("## Audit"));
        assert!(report.contains("## Compliance"));
        assert!(report.contains(NO_VALIDATION_ERRORS));
        gate.orchestrator.shutdown().await;
    }
}
