//! Self-healing hooks run when an alert fires.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Consecutive memory alerts after which the healer reports the pressure as
/// persistent.
const PERSISTENT_AFTER: u32 = 3;

/// A best-effort remedial action for one alert kind.
#[async_trait]
pub trait SelfHealer: Send + Sync {
    /// Attempt a fix. `consecutive` counts how many times in a row the
    /// alert's condition has been seen.
    async fn heal(&self, kind: &str, consecutive: u32) -> Result<String>;
}

/// A cache that can be emptied on memory pressure.
pub trait Purgeable: Send + Sync {
    fn name(&self) -> &str;

    /// Drop every entry. Returns how many were dropped.
    fn purge(&self) -> usize;
}

/// Purges registered caches on a memory alert.
#[derive(Default)]
pub struct MemoryHealer {
    caches: Mutex<Vec<Arc<dyn Purgeable>>>,
}

impl MemoryHealer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opt a cache in to purging.
    pub fn register(&self, cache: Arc<dyn Purgeable>) {
        self.caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cache);
    }

    pub fn cache_count(&self) -> usize {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl SelfHealer for MemoryHealer {
    async fn heal(&self, kind: &str, consecutive: u32) -> Result<String> {
        let caches: Vec<Arc<dyn Purgeable>> = self
            .caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut dropped = 0;
        for cache in &caches {
            let n = cache.purge();
            info!(cache = cache.name(), dropped = n, "Purged cache");
            dropped += n;
        }
        // No collector to ask; freeing cache memory is all there is.
        info!(kind, "Garbage collection not available; purged caches only");

        if consecutive >= PERSISTENT_AFTER {
            warn!(kind, consecutive, "Memory pressure persists after purging caches");
        }
        Ok(format!("purged {} entries from {} cache(s)", dropped, caches.len()))
    }
}
