use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    uploads_accepted: AtomicU64,
    uploads_rejected: AtomicU64,
    processing_completed: AtomicU64,
    processing_failed: AtomicU64,
    blobs_reconciled: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an upload that produced a persisted record.
    pub fn record_accepted(&self) {
        self.uploads_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an upload that was turned away before a record existed.
    pub fn record_rejected(&self) {
        self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record that reached `completed`.
    pub fn record_completed(&self) {
        self.processing_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record that reached `failed`.
    pub fn record_failed(&self) {
        self.processing_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record orphaned blobs removed by a reconciliation pass.
    pub fn record_reconciled(&self, removed: u64) {
        self.blobs_reconciled.fetch_add(removed, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads_accepted: self.uploads_accepted.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            processing_completed: self.processing_completed.load(Ordering::Relaxed),
            processing_failed: self.processing_failed.load(Ordering::Relaxed),
            blobs_reconciled: self.blobs_reconciled.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Uploads that produced a persisted record since startup.
    pub uploads_accepted: u64,
    /// Uploads rejected by validation or storage.
    pub uploads_rejected: u64,
    /// Records that finished processing successfully.
    pub processing_completed: u64,
    /// Records whose processing failed.
    pub processing_failed: u64,
    /// Orphaned blobs removed by reconciliation.
    pub blobs_reconciled: u64,
}
