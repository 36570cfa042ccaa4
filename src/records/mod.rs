//! File records and the persistence contract the pipeline depends on.

mod json;
mod memory;
mod types;

#[cfg(test)]
pub(crate) use types::fixtures;
pub use json::JsonRecordStore;
pub use memory::MemoryRecordStore;
pub use types::{
    FileFilter, FileRecord, Metadata, NewFileRecord, Page, ProcessingStatus, TransitionError,
    UnknownStatus,
};

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by record store implementations.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// No record with the id exists.
    #[error("File record {0} not found")]
    NotFound(Uuid),
    /// A record with the id already exists.
    #[error("File record {0} already exists")]
    Duplicate(Uuid),
    /// Backing storage failed.
    #[error("Record storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be encoded.
    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A stored record exists but could not be decoded.
    #[error("Stored record {} is unreadable: {source}", path.display())]
    Corrupt {
        /// Location of the unreadable record.
        path: PathBuf,
        /// Decoding failure.
        source: serde_json::Error,
    },
}

/// Persistence for [`FileRecord`]s keyed by id.
///
/// Implementations must tolerate concurrent writes to different ids.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record.
    async fn create(&self, record: &FileRecord) -> Result<(), RecordStoreError>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, RecordStoreError>;

    /// Replace a stored record; fails with [`RecordStoreError::NotFound`] when it is gone.
    async fn update(&self, record: &FileRecord) -> Result<(), RecordStoreError>;

    /// Remove a record, returning `false` when it did not exist.
    async fn delete(&self, id: Uuid) -> Result<bool, RecordStoreError>;

    /// List matching records newest first.
    async fn list(&self, filter: &FileFilter, page: Page)
    -> Result<Vec<FileRecord>, RecordStoreError>;

    /// Every blob path referenced by a stored record.
    ///
    /// Fails rather than returning a partial set when any stored record cannot be read, since
    /// callers delete blobs missing from the result.
    async fn blob_paths(&self) -> Result<HashSet<PathBuf>, RecordStoreError>;
}
