//! Error taxonomy and result types for the ingestion service.

use crate::extraction::ExtractionError;
use crate::intake::IntakeError;
use crate::records::{FileRecord, RecordStoreError, TransitionError};
use crate::storage::BlobStoreError;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Metadata key holding the reason a record failed processing.
pub const PROCESSING_ERROR_KEY: &str = "processing_error";

/// Reasons an upload is refused. Nothing is left behind in either store.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Payload exceeds the configured ceiling.
    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    TooLarge {
        /// Size of the submitted payload.
        size: u64,
        /// Configured maximum.
        limit: u64,
    },
    /// Filename was missing or sanitized to nothing.
    #[error("Invalid filename: '{0}'")]
    InvalidFilename(String),
    /// Extension is not on any allow-list.
    #[error("Unsupported file type '{extension}'. Accepted: {}", accepted.join(", "))]
    UnsupportedType {
        /// Rejected extension.
        extension: String,
        /// Every accepted extension, dotted.
        accepted: Vec<String>,
    },
    /// Writing, verifying, or recording the blob failed; any partial blob was removed.
    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl UploadError {
    /// Whether the caller can fix the request (as opposed to a server-side fault).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::StorageFailure(_))
    }
}

impl From<IntakeError> for UploadError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::InvalidFilename(name) => Self::InvalidFilename(name),
            IntakeError::TooLarge { size, limit } => Self::TooLarge { size, limit },
            IntakeError::UnsupportedType {
                extension,
                accepted,
            } => Self::UnsupportedType {
                extension,
                accepted,
            },
        }
    }
}

/// Errors from service operations other than upload.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Record persistence failed.
    #[error("Record store failed: {0}")]
    Records(#[from] RecordStoreError),
    /// Blob storage failed.
    #[error("Blob store failed: {0}")]
    Blobs(#[from] BlobStoreError),
    /// A lifecycle move was rejected.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Why a record ended in `failed`. Its display text is stored under [`PROCESSING_ERROR_KEY`].
#[derive(Debug, Error)]
pub enum ProcessingFailure {
    /// The extractor reported an error.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Extraction exceeded the configured wall-clock limit.
    #[error("extraction timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    /// The blocking extraction task panicked or was cancelled.
    #[error("extraction task failed: {0}")]
    Task(String),
    /// Processing started but never finished, typically because the process exited.
    #[error("processing interrupted")]
    Interrupted,
}

/// Result of a successful upload.
///
/// `record` is the state returned to the caller right away (`pending`, or `completed` for
/// categories that need no processing). [`UploadReceipt::wait`] resolves once the record
/// reaches a terminal state.
#[derive(Debug)]
pub struct UploadReceipt {
    /// Record as persisted when the upload returned.
    pub record: FileRecord,
    completion: oneshot::Receiver<Option<FileRecord>>,
}

impl UploadReceipt {
    pub(crate) fn new(
        record: FileRecord,
        completion: oneshot::Receiver<Option<FileRecord>>,
    ) -> Self {
        Self { record, completion }
    }

    /// Wait for the terminal record; `None` when it was deleted or processing was abandoned.
    ///
    /// Never yields a record that is still `pending` or `processing`.
    pub async fn wait(self) -> Option<FileRecord> {
        self.completion
            .await
            .ok()
            .flatten()
            .filter(|record| record.status().is_terminal())
    }
}

/// Outcome of [`crate::processing::FileService::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RecoveryReport {
    /// Pending records handed back to the worker.
    pub requeued: usize,
    /// Records stuck in `processing` that were marked failed.
    pub interrupted: usize,
}
