//! Built-in health checks.
//!
//! Each check inspects the live snapshot and, where relevant, volatile process
//! state. Credentials are only tested for presence and shape; their values
//! are never kept.

use super::health::HealthCheckResult;
use super::probe::ResourceProbe;
use crate::config::{BotConfig, MonitorSettings, REQUIRED_CAPABILITIES};
use crate::env::ProcessEnv;
use anyhow::Result;
use regex_lite::Regex;
use std::sync::OnceLock;

pub const CREDENTIALS: &str = "credentials";
pub const RATE_LIMITS: &str = "rate_limits";
pub const MEMORY: &str = "memory";
pub const FEATURE_CONSISTENCY: &str = "feature_consistency";
pub const REQUIRED_CAPABILITIES_CHECK: &str = "required_capabilities";
pub const MODEL_PARAMETERS: &str = "model_parameters";
pub const TIMEOUTS: &str = "timeouts";

/// Checks whose failure blocks a production start.
pub const CRITICAL_CHECKS: &[&str] = &[CREDENTIALS, REQUIRED_CAPABILITIES_CHECK, RATE_LIMITS];

pub const PLATFORM_TOKEN_VAR: &str = "BOT_PLATFORM_TOKEN";
pub const MODEL_API_KEY_VAR: &str = "BOT_MODEL_API_KEY";

/// Capabilities the bot knows how to run.
pub const KNOWN_FEATURES: &[&str] = &[
    "chat",
    "memory",
    "personality",
    "moderation",
    "commands",
    "images",
];

/// Everything a check may look at.
pub struct CheckContext<'a> {
    pub config: &'a BotConfig,
    pub env: &'a dyn ProcessEnv,
    pub probe: &'a dyn ResourceProbe,
    pub settings: &'a MonitorSettings,
}

static PLATFORM_TOKEN: OnceLock<Regex> = OnceLock::new();
static MODEL_API_KEY: OnceLock<Regex> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> Result<&'static Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let compiled = Regex::new(source)?;
    Ok(cell.get_or_init(|| compiled))
}

pub fn credentials(ctx: &CheckContext<'_>) -> Result<HealthCheckResult> {
    let probes = [
        (
            PLATFORM_TOKEN_VAR,
            pattern(&PLATFORM_TOKEN, r"^[A-Za-z0-9._-]{24,}$")?,
        ),
        (
            MODEL_API_KEY_VAR,
            pattern(&MODEL_API_KEY, r"^sk-[A-Za-z0-9_-]{20,}$")?,
        ),
    ];

    let mut missing = Vec::new();
    let mut malformed = Vec::new();
    for (var, re) in probes {
        match ctx.env.var(var) {
            None => missing.push(var),
            Some(value) if value.trim().is_empty() => missing.push(var),
            Some(value) if !re.is_match(value.trim()) => malformed.push(var),
            Some(_) => {}
        }
    }

    if !missing.is_empty() {
        return Ok(HealthCheckResult::unhealthy(
            CREDENTIALS,
            format!("missing credentials: {}", missing.join(", ")),
        )
        .recommend(format!("Set {} in the environment", missing.join(" and "))));
    }
    if !malformed.is_empty() {
        return Ok(HealthCheckResult::unhealthy(
            CREDENTIALS,
            format!("malformed credentials: {}", malformed.join(", ")),
        )
        .recommend("Check the credential values were copied completely"));
    }
    Ok(HealthCheckResult::healthy(CREDENTIALS, "credentials present"))
}

pub fn rate_limits(ctx: &CheckContext<'_>) -> Result<HealthCheckResult> {
    let limits = &ctx.config.rate_limits;
    if limits.per_user_per_minute == 0 || limits.per_user_per_day == 0 || limits.global_per_minute == 0 {
        return Ok(HealthCheckResult::unhealthy(RATE_LIMITS, "a rate limit is zero")
            .recommend("Raise every rate limit to at least 1"));
    }
    if u64::from(limits.per_user_per_minute) * 24 > u64::from(limits.per_user_per_day) {
        return Ok(HealthCheckResult::unhealthy(
            RATE_LIMITS,
            format!(
                "per-minute limit {} exceeds daily limit {} / 24",
                limits.per_user_per_minute, limits.per_user_per_day
            ),
        )
        .recommend("Lower rate_limits.per_user_per_minute or raise per_user_per_day"));
    }
    if limits.global_per_minute < limits.per_user_per_minute {
        return Ok(HealthCheckResult::degraded(
            RATE_LIMITS,
            "global limit is below the per-user limit",
        )
        .recommend("Raise rate_limits.global_per_minute"));
    }
    Ok(HealthCheckResult::healthy(RATE_LIMITS, "rate limits consistent"))
}

pub fn memory(ctx: &CheckContext<'_>) -> Result<HealthCheckResult> {
    let Some(usage) = ctx.probe.memory() else {
        return Ok(HealthCheckResult::healthy(MEMORY, "memory usage unavailable on this platform"));
    };
    let percent = usage.percent();
    let message = format!("resident memory at {:.1}% of host", percent);
    if percent >= ctx.settings.memory_unhealthy_pct {
        return Ok(HealthCheckResult::unhealthy(MEMORY, message)
            .recommend("Reduce cache.max_entries or restart the bot"));
    }
    if percent >= ctx.settings.memory_degraded_pct {
        return Ok(HealthCheckResult::degraded(MEMORY, message).recommend("Reduce cache.max_entries"));
    }
    Ok(HealthCheckResult::healthy(MEMORY, message))
}

pub fn feature_consistency(ctx: &CheckContext<'_>) -> Result<HealthCheckResult> {
    let config = ctx.config;
    let mut problems = Vec::new();

    let unknown: Vec<&str> = config
        .features
        .enabled
        .iter()
        .map(String::as_str)
        .filter(|f| !KNOWN_FEATURES.contains(f))
        .collect();
    if !unknown.is_empty() {
        problems.push(format!("unknown features: {}", unknown.join(", ")));
    }
    if config.has_feature("memory") && config.persona.max_history == 0 {
        problems.push("memory is enabled but persona.max_history is 0".to_string());
    }
    if config.has_feature("personality") && config.persona.name.trim().is_empty() {
        problems.push("personality is enabled without a persona name".to_string());
    }
    if config.has_feature("moderation") && !config.safety.content_filter {
        problems.push("moderation is enabled but the content filter is off".to_string());
    }

    if problems.is_empty() {
        Ok(HealthCheckResult::healthy(FEATURE_CONSISTENCY, "features consistent"))
    } else {
        Ok(HealthCheckResult::degraded(FEATURE_CONSISTENCY, problems.join("; "))
            .recommend("Align the enabled features with their settings"))
    }
}

pub fn required_capabilities(ctx: &CheckContext<'_>) -> Result<HealthCheckResult> {
    let missing: Vec<&str> = REQUIRED_CAPABILITIES
        .iter()
        .copied()
        .filter(|cap| !ctx.config.has_feature(cap))
        .collect();
    if missing.is_empty() {
        Ok(HealthCheckResult::healthy(REQUIRED_CAPABILITIES_CHECK, "required capabilities enabled"))
    } else {
        Ok(HealthCheckResult::unhealthy(
            REQUIRED_CAPABILITIES_CHECK,
            format!("required capabilities disabled: {}", missing.join(", ")),
        )
        .recommend(format!("Add {} to features.enabled", missing.join(", "))))
    }
}

pub fn model_parameters(ctx: &CheckContext<'_>) -> Result<HealthCheckResult> {
    let model = &ctx.config.model;
    if model.name.trim().is_empty() {
        return Ok(HealthCheckResult::unhealthy(MODEL_PARAMETERS, "model name is empty")
            .recommend("Set model.name"));
    }
    if !(0.0..=2.0).contains(&model.temperature) || !(0.0..=1.0).contains(&model.top_p) || model.max_tokens == 0 {
        return Ok(HealthCheckResult::unhealthy(MODEL_PARAMETERS, "model parameters out of range"));
    }
    if model.temperature > 1.5 {
        return Ok(HealthCheckResult::degraded(
            MODEL_PARAMETERS,
            format!("temperature {} makes replies erratic", model.temperature),
        )
        .recommend("Keep model.temperature at or below 1.5"));
    }
    if model.top_p < 0.1 {
        return Ok(HealthCheckResult::degraded(
            MODEL_PARAMETERS,
            format!("top_p {} leaves almost no sampling mass", model.top_p),
        ));
    }
    Ok(HealthCheckResult::healthy(MODEL_PARAMETERS, "model parameters sane"))
}

pub fn timeouts(ctx: &CheckContext<'_>) -> Result<HealthCheckResult> {
    let timeouts = &ctx.config.timeouts;
    if timeouts.connect_ms > timeouts.request_ms {
        return Ok(HealthCheckResult::unhealthy(
            TIMEOUTS,
            format!(
                "connect timeout {}ms exceeds request timeout {}ms",
                timeouts.connect_ms, timeouts.request_ms
            ),
        ));
    }
    if timeouts.request_ms > 120_000 {
        return Ok(HealthCheckResult::degraded(
            TIMEOUTS,
            format!("request timeout {}ms keeps users waiting", timeouts.request_ms),
        )
        .recommend("Lower timeouts.request_ms to 120000 or less"));
    }
    Ok(HealthCheckResult::healthy(TIMEOUTS, "timeouts sane"))
}
