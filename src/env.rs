//! Access to the host process environment.
//!
//! Loader overrides and credential probes read variables through
//! [`ProcessEnv`] so tests can supply a fixed map instead of mutating the
//! real environment.

use std::collections::HashMap;

pub trait ProcessEnv: Send + Sync {
    /// Value of `key`, or `None` when unset or not valid unicode.
    fn var(&self, key: &str) -> Option<String>;

    /// Whether `key` is set to a non-blank value.
    fn is_set(&self, key: &str) -> bool {
        self.var(key).is_some_and(|v| !v.trim().is_empty())
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl ProcessEnv for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// A fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl ProcessEnv for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}
