//! Scoped flags for non-reentrant work.

use std::sync::atomic::{AtomicBool, Ordering};

/// Holds a flag set for as long as the guard lives.
///
/// Used for the reload in-flight flag and for periodic jobs that must not
/// overlap themselves. The flag is cleared on drop, so every exit path,
/// including `?` and panics, releases it.
#[must_use = "the flag is released when the guard is dropped"]
pub struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlagGuard<'a> {
    /// Set `flag`, or return `None` if it was already set.
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
