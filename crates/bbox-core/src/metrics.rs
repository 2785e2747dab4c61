//! Global atomic counters for one bbox invocation.
//!
//! Counters are bumped silently where things happen. Call
//! [`Metrics::flush`] at the end of a command to log them as one event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    builds_triggered: AtomicU64,
    builds_failed: AtomicU64,
    status_polls: AtomicU64,
    artifacts_downloaded: AtomicU64,
    roots_deleted: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            builds_triggered: AtomicU64::new(0),
            builds_failed: AtomicU64::new(0),
            status_polls: AtomicU64::new(0),
            artifacts_downloaded: AtomicU64::new(0),
            roots_deleted: AtomicU64::new(0),
        }
    }

    pub fn inc_builds_triggered(&self) {
        self.builds_triggered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "builds_triggered", "counter incremented");
    }

    pub fn inc_builds_failed(&self) {
        self.builds_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "builds_failed", "counter incremented");
    }

    pub fn inc_status_polls(&self) {
        self.status_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_artifacts_downloaded(&self) {
        self.artifacts_downloaded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "artifacts_downloaded", "counter incremented");
    }

    pub fn inc_roots_deleted(&self) {
        self.roots_deleted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "roots_deleted", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            builds_triggered = self.builds_triggered(),
            builds_failed = self.builds_failed(),
            status_polls = self.status_polls(),
            artifacts_downloaded = self.artifacts_downloaded(),
            roots_deleted = self.roots_deleted(),
        );
    }

    pub fn builds_triggered(&self) -> u64 {
        self.builds_triggered.load(Ordering::Relaxed)
    }

    pub fn builds_failed(&self) -> u64 {
        self.builds_failed.load(Ordering::Relaxed)
    }

    pub fn status_polls(&self) -> u64 {
        self.status_polls.load(Ordering::Relaxed)
    }

    pub fn artifacts_downloaded(&self) -> u64 {
        self.artifacts_downloaded.load(Ordering::Relaxed)
    }

    pub fn roots_deleted(&self) -> u64 {
        self.roots_deleted.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.builds_triggered.store(0, Ordering::Relaxed);
        self.builds_failed.store(0, Ordering::Relaxed);
        self.status_polls.store(0, Ordering::Relaxed);
        self.artifacts_downloaded.store(0, Ordering::Relaxed);
        self.roots_deleted.store(0, Ordering::Relaxed);
    }
}
