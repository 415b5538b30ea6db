//! In-process counters for the worker pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by all workers of one pool
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Jobs fully processed
    pub jobs_completed: AtomicU64,

    /// Jobs abandoned because their record was missing or corrupt
    pub jobs_abandoned: AtomicU64,

    /// Jobs whose context vanished before results were recorded
    pub jobs_orphaned: AtomicU64,

    /// Workers currently holding a job
    pub jobs_in_flight: AtomicU64,

    pub groups_kept: AtomicU64,

    pub groups_discarded: AtomicU64,

    /// Total time spent filtering, for averaging
    pub total_processing_ms: AtomicU64,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.jobs_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, kept: usize, discarded: usize, processing_time: Duration) {
        self.jobs_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.groups_kept.fetch_add(kept as u64, Ordering::Relaxed);
        self.groups_discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        self.total_processing_ms
            .fetch_add(processing_time.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_orphaned(&self) {
        self.jobs_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.jobs_orphaned.fetch_add(1, Ordering::Relaxed);
    }

    /// A claimed job could not be decoded
    pub fn record_abandoned(&self) {
        self.jobs_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// A job failed after it was started
    pub fn record_failed(&self) {
        self.jobs_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.jobs_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_processing_ms(&self) -> f64 {
        let completed = self.jobs_completed.load(Ordering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        self.total_processing_ms.load(Ordering::Relaxed) as f64 / completed as f64
    }

    /// Fraction of examined groups that were kept
    pub fn keep_rate(&self) -> f64 {
        let kept = self.groups_kept.load(Ordering::Relaxed);
        let total = kept + self.groups_discarded.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        kept as f64 / total as f64
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_abandoned: self.jobs_abandoned.load(Ordering::Relaxed),
            jobs_orphaned: self.jobs_orphaned.load(Ordering::Relaxed),
            jobs_in_flight: self.jobs_in_flight.load(Ordering::Relaxed),
            groups_kept: self.groups_kept.load(Ordering::Relaxed),
            groups_discarded: self.groups_discarded.load(Ordering::Relaxed),
            avg_processing_ms: self.avg_processing_ms(),
            keep_rate: self.keep_rate(),
        }
    }
}

/// Point-in-time copy of [`PoolStats`]
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PoolSnapshot {
    pub jobs_completed: u64,
    pub jobs_abandoned: u64,
    pub jobs_orphaned: u64,
    pub jobs_in_flight: u64,
    pub groups_kept: u64,
    pub groups_discarded: u64,
    pub avg_processing_ms: f64,
    pub keep_rate: f64,
}
