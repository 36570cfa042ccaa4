//! Record model, processing lifecycle, and query types.

use crate::intake::FileCategory;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Created, no work started.
    Pending,
    /// Extraction in progress.
    Processing,
    /// Terminal success.
    Completed,
    /// Terminal failure; the reason lives in metadata.
    Failed,
}

impl ProcessingStatus {
    /// Stable lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a status name cannot be parsed.
#[derive(Debug, Error)]
#[error("unknown processing status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ProcessingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Rejected lifecycle move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition {from} -> {to} for {category} record")]
pub struct TransitionError {
    /// Current status.
    pub from: ProcessingStatus,
    /// Requested status.
    pub to: ProcessingStatus,
    /// Category of the record.
    pub category: FileCategory,
}

/// Open string-keyed mapping that only ever grows or overwrites keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add new keys and overwrite existing ones; keys absent from `entries` are untouched.
    pub fn merge(&mut self, entries: Map<String, Value>) {
        for (key, value) in entries {
            self.0.insert(key, value);
        }
    }

    /// Look up a single key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the mapping has no keys.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// One ingested artifact.
///
/// Identity, location and physical facts are fixed at creation. Status, metadata and
/// extracted text change only through [`FileRecord::advance`], [`FileRecord::merge_metadata`]
/// and [`FileRecord::attach_text`], each of which bumps `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Unique record id.
    pub id: Uuid,
    /// Collision-resistant name of the blob on disk.
    pub stored_name: String,
    /// Sanitized form of the submitted name.
    pub display_name: String,
    /// Name exactly as submitted; untrusted.
    pub original_name: String,
    /// Blob exclusively owned by this record.
    pub blob_path: PathBuf,
    /// Classification derived from the extension at intake.
    pub category: FileCategory,
    /// Byte size of the stored blob.
    pub size_bytes: u64,
    /// MIME type sniffed from content.
    pub mime_type: String,
    /// Hex SHA-256 of the stored blob.
    pub content_hash: String,
    /// Optional project association.
    pub project_id: Option<Uuid>,
    /// Optional task association.
    pub task_id: Option<Uuid>,
    /// Identity that uploaded the file.
    pub uploader_id: Uuid,
    /// Creation time; immutable.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    status: ProcessingStatus,
    metadata: Metadata,
    extracted_text: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

/// Fields needed to create a record in the `pending` state.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    /// Collision-resistant name of the blob on disk.
    pub stored_name: String,
    /// Sanitized form of the submitted name.
    pub display_name: String,
    /// Name exactly as submitted.
    pub original_name: String,
    /// Blob location.
    pub blob_path: PathBuf,
    /// Category from intake.
    pub category: FileCategory,
    /// Byte size on disk.
    pub size_bytes: u64,
    /// Sniffed MIME type.
    pub mime_type: String,
    /// Hex SHA-256 digest.
    pub content_hash: String,
    /// Optional project association.
    pub project_id: Option<Uuid>,
    /// Optional task association.
    pub task_id: Option<Uuid>,
    /// Uploading identity.
    pub uploader_id: Uuid,
    /// Initial metadata.
    pub metadata: Metadata,
}

impl FileRecord {
    /// Build a fresh `pending` record with a new id.
    pub fn new(fields: NewFileRecord) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            stored_name: fields.stored_name,
            display_name: fields.display_name,
            original_name: fields.original_name,
            blob_path: fields.blob_path,
            category: fields.category,
            size_bytes: fields.size_bytes,
            mime_type: fields.mime_type,
            content_hash: fields.content_hash,
            project_id: fields.project_id,
            task_id: fields.task_id,
            uploader_id: fields.uploader_id,
            created_at: now,
            status: ProcessingStatus::Pending,
            metadata: fields.metadata,
            extracted_text: None,
            updated_at: now,
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    /// Accumulated metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Extracted text, when extraction produced any.
    pub fn extracted_text(&self) -> Option<&str> {
        self.extracted_text.as_deref()
    }

    /// Time of the last mutation.
    pub fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    /// Move to `next`, enforcing the lifecycle.
    ///
    /// Categories that require processing must pass through `processing`; the others may
    /// complete straight from `pending`. Terminal states never change.
    pub fn advance(&mut self, next: ProcessingStatus) -> Result<(), TransitionError> {
        use ProcessingStatus::*;
        let allowed = match (self.status, next) {
            (Pending, Processing) => self.category.requires_processing(),
            (Pending, Completed) => !self.category.requires_processing(),
            (Processing, Completed) | (Processing, Failed) => true,
            _ => false,
        };
        if !allowed {
            return Err(TransitionError {
                from: self.status,
                to: next,
                category: self.category,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Merge entries into metadata.
    pub fn merge_metadata(&mut self, entries: Map<String, Value>) {
        self.metadata.merge(entries);
        self.touch();
    }

    /// Attach the extraction result.
    pub fn attach_text(&mut self, text: String) {
        self.extracted_text = Some(text);
        self.touch();
    }

    fn touch(&mut self) {
        let now = OffsetDateTime::now_utc();
        // Clock steps backwards must not make updates appear older than creation.
        self.updated_at = now.max(self.created_at);
    }
}

/// Optional equality filters for listing records; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileFilter {
    /// Match a project association.
    pub project_id: Option<Uuid>,
    /// Match a task association.
    pub task_id: Option<Uuid>,
    /// Match a category.
    pub category: Option<FileCategory>,
    /// Match an uploader.
    pub uploader_id: Option<Uuid>,
    /// Match a lifecycle state.
    pub status: Option<ProcessingStatus>,
}

impl FileFilter {
    /// Whether `record` satisfies every set field.
    pub fn matches(&self, record: &FileRecord) -> bool {
        self.project_id.is_none_or(|id| record.project_id == Some(id))
            && self.task_id.is_none_or(|id| record.task_id == Some(id))
            && self.category.is_none_or(|category| record.category == category)
            && self.uploader_id.is_none_or(|id| record.uploader_id == id)
            && self.status.is_none_or(|status| record.status == status)
    }
}

/// Limit/offset pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Maximum number of records returned.
    pub limit: usize,
    /// Number of records skipped.
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Sort newest first and cut out the requested page.
pub(crate) fn paginate(mut records: Vec<FileRecord>, page: Page) -> Vec<FileRecord> {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    records
        .into_iter()
        .skip(page.offset)
        .take(page.limit)
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::new_record;
    use super::*;
    use serde_json::json;

    #[test]
    fn documents_must_pass_through_processing() {
        let mut record = new_record(FileCategory::Document);
        let err = record.advance(ProcessingStatus::Completed).unwrap_err();
        assert_eq!(err.from, ProcessingStatus::Pending);

        record.advance(ProcessingStatus::Processing).unwrap();
        record.advance(ProcessingStatus::Completed).unwrap();
        assert_eq!(record.status(), ProcessingStatus::Completed);
    }

    #[test]
    fn images_complete_directly() {
        let mut record = new_record(FileCategory::Image);
        assert!(record.advance(ProcessingStatus::Processing).is_err());
        record.advance(ProcessingStatus::Completed).unwrap();
    }

    #[test]
    fn terminal_states_are_final() {
        let mut record = new_record(FileCategory::Audio);
        record.advance(ProcessingStatus::Processing).unwrap();
        record.advance(ProcessingStatus::Failed).unwrap();
        for next in [
            ProcessingStatus::Pending,
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
        ] {
            assert!(record.advance(next).is_err());
        }
        assert!(record.status().is_terminal());
    }

    #[test]
    fn metadata_merge_adds_and_overwrites() {
        let mut record = new_record(FileCategory::Document);
        record.merge_metadata(json!({"a": 1, "b": 2}).as_object().cloned().unwrap());
        record.merge_metadata(json!({"b": 3, "c": 4}).as_object().cloned().unwrap());
        let metadata = record.metadata();
        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata.get("a"), Some(&json!(1)));
        assert_eq!(metadata.get("b"), Some(&json!(3)));
    }

    #[test]
    fn mutations_bump_updated_at() {
        let mut record = new_record(FileCategory::Document);
        let created = record.created_at;
        record.attach_text("text".into());
        assert!(record.updated_at() >= created);
        assert_eq!(record.created_at, created);
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut record = new_record(FileCategory::Document);
        record.advance(ProcessingStatus::Processing).unwrap();
        let encoded = serde_json::to_string(&record).unwrap();
        assert!(encoded.contains("\"status\":\"processing\""));
        let decoded: FileRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn filter_requires_every_set_field() {
        let project = Uuid::new_v4();
        let mut record = new_record(FileCategory::Document);
        record.project_id = Some(project);

        assert!(FileFilter::default().matches(&record));
        let by_project = FileFilter {
            project_id: Some(project),
            ..FileFilter::default()
        };
        assert!(by_project.matches(&record));
        let mismatched = FileFilter {
            project_id: Some(project),
            category: Some(FileCategory::Audio),
            ..FileFilter::default()
        };
        assert!(!mismatched.matches(&record));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "Failed".parse::<ProcessingStatus>().unwrap(),
            ProcessingStatus::Failed
        );
        assert!("done".parse::<ProcessingStatus>().is_err());
    }
}
