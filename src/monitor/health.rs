use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one check or of the whole service. Ordered by badness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Healthy,
            message: message.into(),
            severity: Severity::Info,
            recommendation: None,
        }
    }

    pub fn degraded(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Degraded,
            message: message.into(),
            severity: Severity::Warning,
            recommendation: None,
        }
    }

    pub fn unhealthy(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Unhealthy,
            message: message.into(),
            severity: Severity::Critical,
            recommendation: None,
        }
    }

    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Worst status among `results`; healthy when empty.
pub fn worst_of<'a>(results: impl IntoIterator<Item = &'a HealthCheckResult>) -> HealthStatus {
    results
        .into_iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

/// Summary of one run over every registered check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateHealth {
    pub status: HealthStatus,
    pub passed: usize,
    pub failed: usize,
    pub recommendations: Vec<String>,
    pub checked_at: DateTime<Utc>,
    pub results: Vec<HealthCheckResult>,
}

impl AggregateHealth {
    pub fn from_results(results: Vec<HealthCheckResult>) -> Self {
        let passed = results.iter().filter(|r| r.is_healthy()).count();
        let recommendations = results
            .iter()
            .filter(|r| !r.is_healthy())
            .filter_map(|r| r.recommendation.clone())
            .collect();
        Self {
            status: worst_of(&results),
            passed,
            failed: results.len() - passed,
            recommendations,
            checked_at: Utc::now(),
            results,
        }
    }

    pub fn result(&self, name: &str) -> Option<&HealthCheckResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn failing(&self) -> impl Iterator<Item = &HealthCheckResult> {
        self.results.iter().filter(|r| !r.is_healthy())
    }
}

/// Derived edges of a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthStatus,
    pub to: HealthStatus,
}

impl Transition {
    /// `None` when the status did not change.
    pub fn between(from: HealthStatus, to: HealthStatus) -> Option<Self> {
        (from != to).then_some(Self { from, to })
    }

    pub fn is_degradation(&self) -> bool {
        self.from == HealthStatus::Healthy && self.to == HealthStatus::Degraded
    }

    pub fn is_unhealthy(&self) -> bool {
        self.to == HealthStatus::Unhealthy
    }

    pub fn is_recovery(&self) -> bool {
        self.to == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: HealthStatus) -> HealthCheckResult {
        HealthCheckResult {
            name: "x".to_string(),
            status,
            message: String::new(),
            severity: Severity::Info,
            recommendation: None,
        }
    }

    #[test]
    fn test_worst_of_law_exhaustive() {
        use HealthStatus::*;
        let statuses = [Healthy, Degraded, Unhealthy];
        for n in 0..=4u32 {
            for combo in 0..3usize.pow(n) {
                let mut code = combo;
                let mut results = Vec::new();
                for _ in 0..n {
                    results.push(result(statuses[code % 3]));
                    code /= 3;
                }
                let expected = if results.iter().any(|r| r.status == Unhealthy) {
                    Unhealthy
                } else if results.iter().any(|r| r.status == Degraded) {
                    Degraded
                } else {
                    Healthy
                };
                assert_eq!(worst_of(&results), expected, "{:?}", results);
            }
        }
    }

    #[test]
    fn test_aggregate_counts() {
        let agg = AggregateHealth::from_results(vec![
            result(HealthStatus::Healthy),
            result(HealthStatus::Degraded).recommend("fix it"),
            result(HealthStatus::Healthy).recommend("ignored"),
        ]);
        assert_eq!(agg.status, HealthStatus::Degraded);
        assert_eq!(agg.passed, 2);
        assert_eq!(agg.failed, 1);
        assert_eq!(agg.recommendations, vec!["fix it".to_string()]);
    }

    #[test]
    fn test_transition_edges() {
        use HealthStatus::*;
        assert!(Transition::between(Healthy, Healthy).is_none());
        let t = Transition::between(Healthy, Degraded).unwrap();
        assert!(t.is_degradation() && !t.is_unhealthy() && !t.is_recovery());
        let t = Transition::between(Degraded, Unhealthy).unwrap();
        assert!(t.is_unhealthy() && !t.is_degradation());
        let t = Transition::between(Unhealthy, Degraded).unwrap();
        assert!(!t.is_degradation() && !t.is_unhealthy() && !t.is_recovery());
        assert!(Transition::between(Unhealthy, Healthy).unwrap().is_recovery());
    }
}
