//! Structural and semantic validation of candidate configurations.
//!
//! Validation is pure: it never mutates the candidate and reports issues in a
//! fixed order, so identical input always yields an identical report.

use super::path::ConfigPath;
use super::types::{BotConfig, REQUIRED_SECTIONS};
use crate::error::{ConfigError, ConfigResult, ValidationIssue};
use serde::Serialize;
use serde_json::Value;

/// Outcome of validating one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_issues(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> ConfigResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(ConfigError::validation(self.errors))
        }
    }
}

struct RangeRule {
    path: &'static str,
    min: f64,
    max: f64,
    integer: bool,
}

const fn range(path: &'static str, min: f64, max: f64, integer: bool) -> RangeRule {
    RangeRule {
        path,
        min,
        max,
        integer,
    }
}

const RANGE_RULES: &[RangeRule] = &[
    range("model.temperature", 0.0, 2.0, false),
    range("model.top_p", 0.0, 1.0, false),
    range("model.max_tokens", 1.0, 200_000.0, true),
    range("rate_limits.per_user_per_minute", 1.0, 10_000.0, true),
    range("rate_limits.per_user_per_day", 1.0, 1_000_000.0, true),
    range("rate_limits.global_per_minute", 1.0, 100_000.0, true),
    range("cache.ttl_seconds", 1.0, 604_800.0, true),
    range("cache.max_entries", 1.0, 1_000_000.0, true),
    range("persona.max_history", 0.0, 500.0, true),
    range("timeouts.request_ms", 1_000.0, 600_000.0, true),
    range("timeouts.connect_ms", 100.0, 120_000.0, true),
    range("safety.max_message_chars", 1.0, 100_000.0, true),
];

const LIST_FIELDS: &[&str] = &["bot.owner_ids", "features.enabled", "safety.blocked_terms"];

const NON_EMPTY_STRINGS: &[&str] = &["bot.name", "bot.command_prefix", "model.name", "persona.name"];

const BOOL_FIELDS: &[&str] = &["cache.enabled", "safety.content_filter"];

/// Validate an untyped candidate document.
pub fn validate(candidate: &Value) -> ValidationReport {
    let Some(root) = candidate.as_object() else {
        return ValidationReport::from_issues(vec![ValidationIssue::new(
            "",
            "configuration must be a mapping of sections",
        )]);
    };

    let mut issues = Vec::new();

    for section in REQUIRED_SECTIONS {
        match root.get(*section) {
            None | Some(Value::Null) => {
                issues.push(ValidationIssue::new(*section, "required section is missing"))
            }
            Some(Value::Object(_)) => {}
            Some(_) => issues.push(ValidationIssue::new(*section, "section must be a mapping")),
        }
    }
    // Field checks against absent sections would only repeat the same problem.
    if !issues.is_empty() {
        return ValidationReport::from_issues(issues);
    }

    for rule in RANGE_RULES {
        check_range(candidate, rule, &mut issues);
    }
    for path in LIST_FIELDS {
        check_string_list(candidate, path, &mut issues);
    }
    for path in NON_EMPTY_STRINGS {
        match field(candidate, path) {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(Value::String(_)) => issues.push(ValidationIssue::new(*path, "must not be empty")),
            Some(_) => issues.push(ValidationIssue::new(*path, "must be a string")),
            None => issues.push(ValidationIssue::new(*path, "required field is missing")),
        }
    }
    for path in BOOL_FIELDS {
        if let Some(value) = field(candidate, path)
            && !value.is_boolean()
        {
            issues.push(ValidationIssue::new(*path, "must be true or false"));
        }
    }

    check_cross_fields(candidate, &mut issues);

    // Catch anything the rule tables do not cover (unexpected types on
    // fields with defaults, for example).
    if issues.is_empty()
        && let Err(e) = serde_json::from_value::<BotConfig>(candidate.clone())
    {
        issues.push(ValidationIssue::new("", format!("does not match schema: {}", e)));
    }

    ValidationReport::from_issues(issues)
}

/// Validate a typed snapshot.
pub fn validate_config(config: &BotConfig) -> ValidationReport {
    match serde_json::to_value(config) {
        Ok(value) => validate(&value),
        Err(e) => ValidationReport::from_issues(vec![ValidationIssue::new("", e.to_string())]),
    }
}

/// Validate and convert a candidate into a typed snapshot.
pub fn validate_into(candidate: &Value) -> ConfigResult<BotConfig> {
    validate(candidate).into_result()?;
    serde_json::from_value(candidate.clone()).map_err(|e| ConfigError::invalid("", e.to_string()))
}

fn field<'a>(candidate: &'a Value, dotted: &str) -> Option<&'a Value> {
    ConfigPath::parse(dotted)
        .ok()?
        .lookup(candidate)
        .filter(|v| !v.is_null())
}

fn check_range(candidate: &Value, rule: &RangeRule, issues: &mut Vec<ValidationIssue>) {
    let Some(value) = field(candidate, rule.path) else {
        issues.push(ValidationIssue::new(rule.path, "required field is missing"));
        return;
    };
    let Some(number) = value.as_f64() else {
        issues.push(ValidationIssue::new(rule.path, "must be a number"));
        return;
    };
    if rule.integer && number.fract() != 0.0 {
        issues.push(ValidationIssue::new(rule.path, "must be a whole number"));
        return;
    }
    if !(rule.min..=rule.max).contains(&number) {
        issues.push(ValidationIssue::new(
            rule.path,
            format!("must be within [{}, {}], got {}", rule.min, rule.max, number),
        ));
    }
}

fn check_string_list(candidate: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    match field(candidate, path) {
        None => {}
        Some(Value::Array(items)) => {
            if items.iter().any(|item| !item.is_string()) {
                issues.push(ValidationIssue::new(path, "list entries must be strings"));
            }
        }
        Some(_) => issues.push(ValidationIssue::new(path, "must be a list")),
    }
}

fn check_cross_fields(candidate: &Value, issues: &mut Vec<ValidationIssue>) {
    let number = |path: &str| field(candidate, path).and_then(Value::as_f64);

    if let (Some(per_minute), Some(per_day)) = (
        number("rate_limits.per_user_per_minute"),
        number("rate_limits.per_user_per_day"),
    ) && per_minute > per_day / 24.0
    {
        issues.push(ValidationIssue::new(
            "rate_limits.per_user_per_minute",
            format!(
                "must not exceed per_user_per_day / 24 ({:.2}), got {}",
                per_day / 24.0,
                per_minute
            ),
        ));
    }

    if let (Some(connect), Some(request)) = (number("timeouts.connect_ms"), number("timeouts.request_ms"))
        && connect > request
    {
        issues.push(ValidationIssue::new(
            "timeouts.connect_ms",
            format!("must not exceed timeouts.request_ms ({})", request),
        ));
    }
}
