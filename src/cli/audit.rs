//! Audit subcommand: query the change log.

use crate::audit::{AuditAction, AuditEntry, AuditFilter};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, ValueEnum};

/// Output format for listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Arguments for the audit subcommand
#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Only entries at or after this point: RFC 3339 timestamp or a relative
    /// age such as `30m`, `24h`, `7d`
    #[arg(long, value_name = "WHEN")]
    pub since: Option<String>,

    /// Only entries at or before this point (same forms as --since)
    #[arg(long, value_name = "WHEN")]
    pub until: Option<String>,

    /// Comma-separated actions (update, reload, save, rollback, import, export, reset, migrate)
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    pub action: Vec<AuditAction>,

    /// Only entries whose path contains this text
    #[arg(long, value_name = "TEXT")]
    pub path: Option<String>,

    #[arg(long)]
    pub actor: Option<String>,

    /// Only significant entries
    #[arg(long)]
    pub significant: bool,

    /// Maximum number of entries, newest first
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl AuditArgs {
    pub fn to_filter(&self, now: DateTime<Utc>) -> Result<AuditFilter, String> {
        Ok(AuditFilter {
            since: self.since.as_deref().map(|s| parse_when(s, now)).transpose()?,
            until: self.until.as_deref().map(|s| parse_when(s, now)).transpose()?,
            actions: self.action.clone(),
            path_contains: self.path.clone(),
            actor: self.actor.clone(),
            significant: self.significant.then_some(true),
            limit: self.limit,
        })
    }
}

/// Parse an RFC 3339 timestamp or a relative age (`90s`, `30m`, `24h`, `7d`).
pub fn parse_when(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let raw = raw.trim();
    let split = raw.len().saturating_sub(1);
    let (amount, unit) = raw.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| format!("Invalid time '{}'. Use RFC 3339 or an age like 24h", raw))?;
    let age = match unit {
        "s" => Duration::seconds(amount),
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        _ => return Err(format!("Invalid time unit in '{}'. Valid units: s, m, h, d", raw)),
    };
    Ok(now - age)
}

/// One line per entry.
pub fn render_entry(entry: &AuditEntry) -> String {
    let mut line = format!(
        "{} {:<8} {:<12}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.action,
        entry.actor
    );
    if let Some(path) = &entry.path {
        line.push(' ');
        line.push_str(&path.to_string());
    }
    if let (Some(before), Some(after)) = (&entry.before, &entry.after)
        && entry.path.is_some()
    {
        line.push_str(&format!(": {} -> {}", before, after));
    }
    if entry.significant {
        line.push_str(" [significant]");
    }
    if let Some(reason) = &entry.reason {
        line.push_str(&format!(" ({})", reason));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_when() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(parse_when("24h", now).unwrap(), now - Duration::hours(24));
        assert_eq!(parse_when("7d", now).unwrap(), now - Duration::days(7));
        assert_eq!(
            parse_when("2026-03-01T00:00:00Z", now).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_when("yesterday", now).is_err());
        assert!(parse_when("5w", now).is_err());
    }

    #[test]
    fn test_to_filter() {
        let now = Utc::now();
        let args = AuditArgs {
            since: Some("1h".to_string()),
            until: None,
            action: vec![AuditAction::Rollback],
            path: Some("model".to_string()),
            actor: None,
            significant: true,
            limit: Some(5),
            format: OutputFormat::Json,
        };
        let filter = args.to_filter(now).unwrap();
        assert_eq!(filter.since, Some(now - Duration::hours(1)));
        assert_eq!(filter.actions, vec![AuditAction::Rollback]);
        assert_eq!(filter.significant, Some(true));
        assert_eq!(filter.limit, Some(5));
    }
}
