//! Error taxonomy for configuration operations.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Rejections (never partially applied)
    ValidationFailed,
    IntegrityMismatch,
    ParseFailed,
    UnknownPath,

    // Lookups
    VersionNotFound,
    NotInitialized,

    // Infrastructure
    PersistenceFailed,
    WatcherFailed,
    StartupBlocked,
}

/// A single rejected field in a candidate configuration.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending field (empty for whole-document problems).
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration rejected: {}", join_issues(.errors))]
    Validation { errors: Vec<ValidationIssue> },

    #[error("integrity check failed for version {version_id}: stored hash {expected}, recomputed {actual}")]
    Integrity {
        version_id: String,
        expected: String,
        actual: String,
    },

    #[error("failed to persist {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("version not found: {version_id}")]
    NotFound { version_id: String },

    #[error("configuration service is not initialized")]
    NotInitialized,

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unknown configuration path: {path}")]
    UnknownPath { path: String },

    #[error("startup blocked by failing critical checks: {}", .failing.join(", "))]
    StartupBlocked { failing: Vec<String> },

    #[error("file watcher error: {0}")]
    Watcher(String),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::Validation { .. } => ErrorCode::ValidationFailed,
            ConfigError::Integrity { .. } => ErrorCode::IntegrityMismatch,
            ConfigError::Persistence { .. } => ErrorCode::PersistenceFailed,
            ConfigError::NotFound { .. } => ErrorCode::VersionNotFound,
            ConfigError::NotInitialized => ErrorCode::NotInitialized,
            ConfigError::Parse { .. } => ErrorCode::ParseFailed,
            ConfigError::UnknownPath { .. } => ErrorCode::UnknownPath,
            ConfigError::StartupBlocked { .. } => ErrorCode::StartupBlocked,
            ConfigError::Watcher(_) => ErrorCode::WatcherFailed,
        }
    }

    // Convenience constructors

    pub fn validation(errors: Vec<ValidationIssue>) -> Self {
        ConfigError::Validation { errors }
    }

    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Validation {
            errors: vec![ValidationIssue::new(path, message)],
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        ConfigError::Parse {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn not_found(version_id: &str) -> Self {
        ConfigError::NotFound {
            version_id: version_id.to_string(),
        }
    }

    /// Whether the error leaves the published snapshot untouched by contract.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ConfigError::Validation { .. }
                | ConfigError::Integrity { .. }
                | ConfigError::Parse { .. }
                | ConfigError::NotFound { .. }
        )
    }
}

fn join_issues(errors: &[ValidationIssue]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
