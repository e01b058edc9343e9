//! Metrics and observability for execute-sync.
//!
//! Counters live in process-local atomics so a snapshot can be logged or
//! serialized, and every increment is mirrored to the `metrics` facade for
//! whatever recorder the host installs.

use std::sync::atomic::{AtomicU64, Ordering};

use std::time::Instant;

use crate::warehouse::UploadStats;

/// Metrics collector for replication.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Iterations attempted
    pub iterations_total: AtomicU64,
    /// Iterations that completed
    pub iterations_success: AtomicU64,
    /// Iterations aborted by an error
    pub iterations_failed: AtomicU64,
    /// Pages fetched from the upstream
    pub pages_fetched: AtomicU64,
    /// Documents written to the warehouse
    pub documents_synced: AtomicU64,
    /// Documents skipped as malformed or invalid
    pub documents_rejected: AtomicU64,
    /// Chunks written
    pub chunks_written: AtomicU64,
    /// Chunks the warehouse refused
    pub chunks_failed: AtomicU64,
    /// Chunks dropped by the size policy
    pub chunks_oversized: AtomicU64,
    /// Chunks written with a size warning
    pub size_warnings: AtomicU64,
    /// Views created or replaced
    pub views_created: AtomicU64,
    /// Rows removed by prune
    pub rows_pruned: AtomicU64,
    /// Total iteration duration in milliseconds
    pub sync_duration_ms: AtomicU64,
}

fn add(counter: &AtomicU64, name: &'static str, value: u64) {
    counter.fetch_add(value, Ordering::Relaxed);
    metrics::counter!(name).increment(value);
}

impl Metrics {
    /// Create new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the end of an iteration.
    pub fn record_iteration(&self, success: bool, duration_ms: u64) {
        add(&self.iterations_total, "execute_sync_iterations_total", 1);
        if success {
            add(&self.iterations_success, "execute_sync_iterations_success", 1);
        } else {
            add(&self.iterations_failed, "execute_sync_iterations_failed", 1);
        }
        add(&self.sync_duration_ms, "execute_sync_duration_ms", duration_ms);
    }

    /// Record a fetched page.
    pub fn record_page(&self) {
        add(&self.pages_fetched, "execute_sync_pages_fetched", 1);
    }

    /// Record an uploaded page.
    pub fn record_upload(&self, stats: &UploadStats) {
        add(&self.documents_synced, "execute_sync_documents_synced", stats.documents_processed as u64);
        add(&self.chunks_written, "execute_sync_chunks_written", stats.chunks_written as u64);
        add(&self.chunks_failed, "execute_sync_chunks_failed", stats.chunks_failed as u64);
        add(&self.chunks_oversized, "execute_sync_chunks_oversized", stats.chunks_oversized as u64);
        add(&self.size_warnings, "execute_sync_size_warnings", stats.size_warnings as u64);
    }

    /// Record documents skipped before chunking.
    pub fn record_rejected(&self, count: u64) {
        add(&self.documents_rejected, "execute_sync_documents_rejected", count);
    }

    /// Record created views.
    pub fn record_views(&self, count: u64) {
        add(&self.views_created, "execute_sync_views_created", count);
    }

    /// Record a prune.
    pub fn record_prune(&self, rows: u64) {
        add(&self.rows_pruned, "execute_sync_rows_pruned", rows);
    }

    /// Get snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            iterations_total: self.iterations_total.load(Ordering::Relaxed),
            iterations_success: self.iterations_success.load(Ordering::Relaxed),
            iterations_failed: self.iterations_failed.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            documents_synced: self.documents_synced.load(Ordering::Relaxed),
            documents_rejected: self.documents_rejected.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            chunks_oversized: self.chunks_oversized.load(Ordering::Relaxed),
            size_warnings: self.size_warnings.load(Ordering::Relaxed),
            views_created: self.views_created.load(Ordering::Relaxed),
            rows_pruned: self.rows_pruned.load(Ordering::Relaxed),
            sync_duration_ms: self.sync_duration_ms.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        for counter in [
            &self.iterations_total,
            &self.iterations_success,
            &self.iterations_failed,
            &self.pages_fetched,
            &self.documents_synced,
            &self.documents_rejected,
            &self.chunks_written,
            &self.chunks_failed,
            &self.chunks_oversized,
            &self.size_warnings,
            &self.views_created,
            &self.rows_pruned,
            &self.sync_duration_ms,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Iterations attempted
    pub iterations_total: u64,
    /// Iterations that completed
    pub iterations_success: u64,
    /// Iterations aborted by an error
    pub iterations_failed: u64,
    /// Pages fetched
    pub pages_fetched: u64,
    /// Documents written
    pub documents_synced: u64,
    /// Documents skipped
    pub documents_rejected: u64,
    /// Chunks written
    pub chunks_written: u64,
    /// Chunks refused by the warehouse
    pub chunks_failed: u64,
    /// Chunks dropped by the size policy
    pub chunks_oversized: u64,
    /// Chunks written with a size warning
    pub size_warnings: u64,
    /// Views created
    pub views_created: u64,
    /// Rows pruned
    pub rows_pruned: u64,
    /// Total iteration duration in milliseconds
    pub sync_duration_ms: u64,
}

impl MetricsSnapshot {
    /// Calculate iteration success rate.
    pub fn success_rate(&self) -> f64 {
        if self.iterations_total == 0 {
            0.0
        } else {
            self.iterations_success as f64 / self.iterations_total as f64
        }
    }

    /// Calculate average iteration duration.
    pub fn avg_iteration_ms(&self) -> f64 {
        if self.iterations_total == 0 {
            0.0
        } else {
            self.sync_duration_ms as f64 / self.iterations_total as f64
        }
    }

    /// Calculate documents per second.
    pub fn documents_per_second(&self) -> f64 {
        if self.sync_duration_ms == 0 {
            0.0
        } else {
            (self.documents_synced as f64 * 1000.0) / self.sync_duration_ms as f64
        }
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Start a new timer.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration.
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} completed in {}ms", self.label, elapsed);
        elapsed
    }
}
