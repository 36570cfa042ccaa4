//! Reconciliation of stored blobs against persisted records.
//!
//! Blobs are listed before the record snapshot is taken, so a record committed during the
//! pass is always seen. Blobs younger than the grace period are never removed, which covers
//! a blob whose record has not been committed yet. In-flight writes live in the blob store's
//! staging area and are not listed at all.

use crate::processing::ServiceError;
use crate::records::RecordStore;
use crate::storage::BlobStore;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Orphaned blobs deleted.
    pub removed: usize,
    /// Orphaned blobs whose deletion failed.
    pub failed: usize,
    /// Orphaned blobs left alone because they are newer than the grace period.
    pub skipped_recent: usize,
    /// Records whose blob is missing from storage.
    pub missing_blobs: usize,
}

/// Delete every stored blob that no record references.
///
/// Listing failures abort the pass; per-blob delete failures are logged and counted.
/// Records whose blob is gone are reported, never modified.
pub async fn reconcile_orphans(
    blobs: &dyn BlobStore,
    records: &dyn RecordStore,
    grace_period: Duration,
) -> Result<ReconcileReport, ServiceError> {
    let now = SystemTime::now();
    let stored = blobs.list().await?;
    let referenced = records.blob_paths().await?;
    let mut report = ReconcileReport::default();

    for entry in &stored {
        if referenced.contains(&entry.path) {
            continue;
        }
        let age = now.duration_since(entry.modified).unwrap_or(Duration::ZERO);
        if age < grace_period {
            report.skipped_recent += 1;
            continue;
        }
        match blobs.delete(&entry.path).await {
            Ok(true) => {
                report.removed += 1;
                tracing::debug!(path = %entry.path.display(), "Removed orphaned blob");
            }
            Ok(false) => {}
            Err(err) => {
                report.failed += 1;
                tracing::warn!(path = %entry.path.display(), error = %err, "Failed to remove orphaned blob");
            }
        }
    }

    let present: HashSet<&PathBuf> = stored.iter().map(|entry| &entry.path).collect();
    for path in referenced.iter().filter(|path| !present.contains(path)) {
        // Written after the listing was taken.
        if matches!(blobs.exists(path).await, Ok(true)) {
            continue;
        }
        report.missing_blobs += 1;
        tracing::warn!(path = %path.display(), "Record references a missing blob");
    }

    tracing::info!(
        removed = report.removed,
        failed = report.failed,
        skipped_recent = report.skipped_recent,
        missing_blobs = report.missing_blobs,
        "Reconciliation finished"
    );
    Ok(report)
}
