//! Per-source failure limiter.
//!
//! Sliding-window approximation: a source that fails `MAX_FAILURES` times
//! inside `WINDOW_SECS` is locked out until `LOCKOUT_SECS` after the window
//! opened. Successful verification clears the entry immediately.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

pub const MAX_FAILURES: u32 = 10;
pub const WINDOW_SECS: u64 = 300;
pub const LOCKOUT_SECS: u64 = 300;
pub const CLEANUP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy)]
struct Entry {
    fail_count: u32,
    window_start: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    last_cleanup: u64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn is_blocked(&self, source: &str) -> bool {
        self.is_blocked_at(source, unix_now())
    }

    pub fn record_failure(&self, source: &str) {
        self.record_failure_at(source, unix_now());
    }

    pub fn record_success(&self, source: &str) {
        self.inner.lock().entries.remove(source);
    }

    /// Drops expired entries. Cheap no-op when called more often than
    /// [`CLEANUP_INTERVAL_SECS`].
    pub fn cleanup(&self) {
        self.cleanup_at(unix_now());
    }

    pub(crate) fn is_blocked_at(&self, source: &str, now: u64) -> bool {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get(source).copied() else {
            return false;
        };
        if now.saturating_sub(entry.window_start) > LOCKOUT_SECS {
            inner.entries.remove(source);
            return false;
        }
        entry.fail_count >= MAX_FAILURES
    }

    pub(crate) fn record_failure_at(&self, source: &str, now: u64) {
        let mut inner = self.inner.lock();
        let entry = inner.entries.entry(source.to_string()).or_insert(Entry {
            fail_count: 0,
            window_start: now,
        });
        if now.saturating_sub(entry.window_start) > WINDOW_SECS {
            entry.fail_count = 1;
            entry.window_start = now;
        } else {
            entry.fail_count += 1;
        }
        let count = entry.fail_count;
        if count == MAX_FAILURES {
            tracing::warn!(source, failures = count, "source locked out");
        }
    }

    pub(crate) fn cleanup_at(&self, now: u64) {
        let mut inner = self.inner.lock();
        if now.saturating_sub(inner.last_cleanup) < CLEANUP_INTERVAL_SECS {
            return;
        }
        inner.last_cleanup = now;
        inner
            .entries
            .retain(|_, entry| now.saturating_sub(entry.window_start) <= LOCKOUT_SECS);
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
