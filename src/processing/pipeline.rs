//! Processing state machine driving extraction for one record at a time.

use crate::audio::AudioMetadataExtractor;
use crate::extraction::{TextExtractor, summarize_text};
use crate::intake::FileCategory;
use crate::metrics::PipelineMetrics;
use crate::processing::types::{PROCESSING_ERROR_KEY, ProcessingFailure, ServiceError};
use crate::records::{FileRecord, ProcessingStatus, RecordStore, RecordStoreError};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Tunables applied while processing.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingSettings {
    /// Character cap for extracted text.
    pub max_extracted_chars: usize,
    /// Target length of the summary stored in metadata.
    pub summary_length: usize,
    /// Optional wall-clock limit on document extraction and audio probing.
    pub extraction_timeout: Option<Duration>,
}

enum Extracted {
    Text(Option<String>),
    Audio(Map<String, Value>),
}

/// Moves records through `pending → processing → completed | failed`.
///
/// Each step is persisted before the next begins: the `processing` state is durable before
/// any extraction runs, and the terminal state is durable before [`Pipeline::process`]
/// returns. A record deleted mid-flight is dropped without error.
pub struct Pipeline {
    records: Arc<dyn RecordStore>,
    audio: Arc<dyn AudioMetadataExtractor>,
    extractor: TextExtractor,
    settings: ProcessingSettings,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        records: Arc<dyn RecordStore>,
        audio: Arc<dyn AudioMetadataExtractor>,
        settings: ProcessingSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            records,
            audio,
            extractor: TextExtractor::new(settings.max_extracted_chars),
            settings,
            metrics,
        }
    }

    /// Process a `pending` record to its terminal state.
    ///
    /// Returns the record as last persisted, or `None` when it no longer exists. Records that
    /// are not `pending` are returned untouched.
    pub async fn process(&self, id: Uuid) -> Result<Option<FileRecord>, ServiceError> {
        let Some(mut record) = self.records.get(id).await? else {
            tracing::debug!(file_id = %id, "Record vanished before processing");
            return Ok(None);
        };
        if record.status() != ProcessingStatus::Pending {
            tracing::debug!(file_id = %id, status = %record.status(), "Record already handled");
            return Ok(Some(record));
        }

        if !record.category.requires_processing() {
            record.advance(ProcessingStatus::Completed)?;
            return self.persist_terminal(record).await;
        }

        record.advance(ProcessingStatus::Processing)?;
        if !self.persist(&record).await? {
            return Ok(None);
        }
        tracing::info!(
            file_id = %id,
            category = %record.category,
            mime_type = %record.mime_type,
            "Processing started"
        );

        match self.run(&record).await {
            Ok(Extracted::Text(Some(text))) => {
                let mut entries = Map::new();
                entries.insert("text_length".into(), json!(text.chars().count()));
                entries.insert(
                    "summary".into(),
                    json!(summarize_text(&text, self.settings.summary_length)),
                );
                record.merge_metadata(entries);
                record.attach_text(text);
                record.advance(ProcessingStatus::Completed)?;
            }
            Ok(Extracted::Text(None)) => record.advance(ProcessingStatus::Completed)?,
            Ok(Extracted::Audio(metadata)) => {
                record.merge_metadata(metadata);
                record.advance(ProcessingStatus::Completed)?;
            }
            Err(failure) => fail(&mut record, &failure)?,
        }
        self.persist_terminal(record).await
    }

    /// Mark a record stuck in `processing` as failed.
    pub async fn mark_interrupted(
        &self,
        mut record: FileRecord,
    ) -> Result<Option<FileRecord>, ServiceError> {
        fail(&mut record, &ProcessingFailure::Interrupted)?;
        self.persist_terminal(record).await
    }

    async fn run(&self, record: &FileRecord) -> Result<Extracted, ProcessingFailure> {
        match record.category {
            FileCategory::Audio => {
                let probe = self.audio.extract(&record.blob_path);
                let metadata = match self.settings.extraction_timeout {
                    Some(limit) => tokio::time::timeout(limit, probe)
                        .await
                        .map_err(|_| ProcessingFailure::TimedOut(limit))?,
                    None => probe.await,
                };
                Ok(Extracted::Audio(metadata))
            }
            _ => self.extract_text(record).await.map(Extracted::Text),
        }
    }

    async fn extract_text(&self, record: &FileRecord) -> Result<Option<String>, ProcessingFailure> {
        let extractor = self.extractor;
        let path = record.blob_path.clone();
        let mime_type = record.mime_type.clone();
        let task = tokio::task::spawn_blocking(move || extractor.extract(&path, &mime_type));

        // On timeout the blocking task keeps running detached; only the record is failed.
        let joined = match self.settings.extraction_timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| ProcessingFailure::TimedOut(limit))?,
            None => task.await,
        };
        let text = joined.map_err(|err| ProcessingFailure::Task(err.to_string()))??;
        Ok(text)
    }

    /// Write `record`; `false` when it was deleted in the meantime.
    async fn persist(&self, record: &FileRecord) -> Result<bool, ServiceError> {
        match self.records.update(record).await {
            Ok(()) => Ok(true),
            Err(RecordStoreError::NotFound(id)) => {
                tracing::info!(file_id = %id, "Record deleted during processing; dropping result");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn persist_terminal(&self, record: FileRecord) -> Result<Option<FileRecord>, ServiceError> {
        if !self.persist(&record).await? {
            return Ok(None);
        }
        match record.status() {
            ProcessingStatus::Completed => {
                self.metrics.record_completed();
                tracing::info!(
                    file_id = %record.id,
                    has_text = record.extracted_text().is_some(),
                    "Processing completed"
                );
            }
            ProcessingStatus::Failed => {
                self.metrics.record_failed();
                tracing::warn!(
                    file_id = %record.id,
                    error = ?record.metadata().get(PROCESSING_ERROR_KEY),
                    "Processing failed"
                );
            }
            _ => {}
        }
        Ok(Some(record))
    }
}

fn fail(record: &mut FileRecord, failure: &ProcessingFailure) -> Result<(), ServiceError> {
    let mut entries = Map::new();
    entries.insert(PROCESSING_ERROR_KEY.into(), json!(failure.to_string()));
    record.merge_metadata(entries);
    record.advance(ProcessingStatus::Failed)?;
    Ok(())
}
