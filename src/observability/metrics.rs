//! Metrics registry for query execution
//!
//! - Counters only
//! - Monotonic increase
//! - Thread-safe but lock-minimal

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by every executor of one engine
///
/// Uses Relaxed ordering; counters are independent of each other.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    queries_executed: AtomicU64,
    queries_failed: AtomicU64,
    plans_rejected: AtomicU64,
    elements_read: AtomicU64,
    elements_malformed: AtomicU64,
    early_terminations: AtomicU64,
    materializations: AtomicU64,
    path_fallbacks: AtomicU64,
    cancellations: AtomicU64,
    bytes_read: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment successful queries
    pub fn increment_queries_executed(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment failed queries
    pub fn increment_queries_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment plans rejected by validation
    pub fn increment_plans_rejected(&self) {
        self.plans_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Add elements read from documents
    pub fn add_elements_read(&self, count: u64) {
        self.elements_read.fetch_add(count, Ordering::Relaxed);
    }

    /// Add elements skipped as malformed
    pub fn add_elements_malformed(&self, count: u64) {
        self.elements_malformed.fetch_add(count, Ordering::Relaxed);
    }

    /// Increment early terminations
    pub fn increment_early_terminations(&self) {
        self.early_terminations.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment materialized executions
    pub fn increment_materializations(&self) {
        self.materializations.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment path navigation fallbacks
    pub fn increment_path_fallbacks(&self) {
        self.path_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment cancelled executions
    pub fn increment_cancellations(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// Add bytes pulled from document sources
    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get successful query count
    pub fn queries_executed(&self) -> u64 {
        self.queries_executed.load(Ordering::Relaxed)
    }

    /// Take a point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            plans_rejected: self.plans_rejected.load(Ordering::Relaxed),
            elements_read: self.elements_read.load(Ordering::Relaxed),
            elements_malformed: self.elements_malformed.load(Ordering::Relaxed),
            early_terminations: self.early_terminations.load(Ordering::Relaxed),
            materializations: self.materializations.load(Ordering::Relaxed),
            path_fallbacks: self.path_fallbacks.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_executed: u64,
    pub queries_failed: u64,
    pub plans_rejected: u64,
    pub elements_read: u64,
    pub elements_malformed: u64,
    pub early_terminations: u64,
    pub materializations: u64,
    pub path_fallbacks: u64,
    pub cancellations: u64,
    pub bytes_read: u64,
}
