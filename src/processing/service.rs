//! File service coordinating intake, storage, records, and background processing.

use crate::{
    audio::AudioMetadataExtractor,
    config::Config,
    intake::validate_upload,
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        pipeline::{Pipeline, ProcessingSettings},
        types::{RecoveryReport, ServiceError, UploadError, UploadReceipt},
        worker::{ProcessingJob, WorkerDrain, WorkerHandle, spawn_worker},
    },
    reconcile::{ReconcileReport, reconcile_orphans},
    records::{FileFilter, FileRecord, Metadata, NewFileRecord, Page, ProcessingStatus, RecordStore},
    storage::{BlobStore, MimeSniffer, compute_identity},
};
use serde_json::{Map, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use uuid::Uuid;

/// External collaborators injected into the service.
#[derive(Clone)]
pub struct Collaborators {
    /// Record persistence.
    pub records: Arc<dyn RecordStore>,
    /// Blob persistence.
    pub blobs: Arc<dyn BlobStore>,
    /// Content-based MIME detection.
    pub sniffer: Arc<dyn MimeSniffer>,
    /// Audio metadata source.
    pub audio: Arc<dyn AudioMetadataExtractor>,
}

/// Entry point for callers: upload, query, delete, reconcile.
///
/// Uploads are validated and stored synchronously; extraction is handed to a background
/// worker so the upload call never waits on it. Construct the service inside a Tokio runtime
/// and share it through an `Arc`.
pub struct FileService {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    sniffer: Arc<dyn MimeSniffer>,
    pipeline: Arc<Pipeline>,
    worker: WorkerHandle,
    drain: WorkerDrain,
    metrics: Arc<PipelineMetrics>,
    max_upload_bytes: u64,
    reconcile_grace_period: Duration,
    stuck_processing_after: Duration,
}

impl FileService {
    /// Build the service and start its worker on the current runtime.
    pub fn new(collaborators: Collaborators, config: &Config) -> Self {
        let Collaborators {
            records,
            blobs,
            sniffer,
            audio,
        } = collaborators;
        let metrics = Arc::new(PipelineMetrics::new());
        let pipeline = Arc::new(Pipeline::new(
            records.clone(),
            audio,
            ProcessingSettings {
                max_extracted_chars: config.max_extracted_chars,
                summary_length: config.summary_length,
                extraction_timeout: config.extraction_timeout,
            },
            metrics.clone(),
        ));
        let (worker, drain) = spawn_worker(pipeline.clone(), config.processing_concurrency);
        tracing::debug!(
            concurrency = config.processing_concurrency,
            max_upload_bytes = config.max_upload_bytes,
            "File service ready"
        );

        Self {
            records,
            blobs,
            sniffer,
            pipeline,
            worker,
            drain,
            metrics,
            max_upload_bytes: config.max_upload_bytes,
            reconcile_grace_period: config.reconcile_grace_period,
            stuck_processing_after: config.stuck_processing_after,
        }
    }

    /// Validate, store, and record an upload, then schedule its processing.
    ///
    /// On any error no blob or record is left behind.
    pub async fn upload(
        &self,
        bytes: &[u8],
        original_name: &str,
        uploader_id: Uuid,
        project_id: Option<Uuid>,
        task_id: Option<Uuid>,
    ) -> Result<UploadReceipt, UploadError> {
        let result = self
            .store_upload(bytes, original_name, uploader_id, project_id, task_id)
            .await;
        match result {
            Ok(record) => {
                self.metrics.record_accepted();
                tracing::info!(
                    file_id = %record.id,
                    stored_name = %record.stored_name,
                    category = %record.category,
                    size_bytes = record.size_bytes,
                    "Upload accepted"
                );
                Ok(self.schedule(record).await)
            }
            Err(err) => {
                self.metrics.record_rejected();
                if err.is_client_error() {
                    tracing::info!(original_name, error = %err, "Upload rejected");
                } else {
                    tracing::error!(original_name, error = %err, "Upload failed");
                }
                Err(err)
            }
        }
    }

    /// Upload and wait until the record reaches a terminal state.
    ///
    /// When the terminal state cannot be observed (the record was deleted or the worker
    /// stopped), returns the record as currently stored, or as first persisted if it is gone.
    pub async fn upload_and_wait(
        &self,
        bytes: &[u8],
        original_name: &str,
        uploader_id: Uuid,
        project_id: Option<Uuid>,
        task_id: Option<Uuid>,
    ) -> Result<FileRecord, UploadError> {
        let receipt = self
            .upload(bytes, original_name, uploader_id, project_id, task_id)
            .await?;
        let initial = receipt.record.clone();
        if let Some(done) = receipt.wait().await {
            return Ok(done);
        }
        match self.records.get(initial.id).await {
            Ok(Some(current)) => Ok(current),
            Ok(None) => Ok(initial),
            Err(err) => {
                tracing::warn!(file_id = %initial.id, error = %err, "Failed to re-read record");
                Ok(initial)
            }
        }
    }

    /// Fetch a record by id; `None` when it does not exist.
    pub async fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>, ServiceError> {
        Ok(self.records.get(id).await?)
    }

    /// List records matching `filter`, newest first.
    pub async fn list_files(
        &self,
        filter: &FileFilter,
        page: Page,
    ) -> Result<Vec<FileRecord>, ServiceError> {
        Ok(self.records.list(filter, page).await?)
    }

    /// Delete a record and its blob; `false` when the record did not exist.
    ///
    /// The blob goes first. A blob that is already missing is tolerated; any other blob error
    /// aborts the delete and leaves the record in place.
    pub async fn delete_file(&self, id: Uuid) -> Result<bool, ServiceError> {
        let Some(record) = self.records.get(id).await? else {
            return Ok(false);
        };
        if !self.blobs.delete(&record.blob_path).await? {
            tracing::warn!(
                file_id = %id,
                path = %record.blob_path.display(),
                "Blob already missing while deleting record"
            );
        }
        let deleted = self.records.delete(id).await?;
        tracing::info!(file_id = %id, "File deleted");
        Ok(deleted)
    }

    /// Remove stored blobs no record references; returns how many were removed.
    pub async fn reconcile(&self) -> Result<usize, ServiceError> {
        Ok(self.reconcile_report().await?.removed)
    }

    /// Reconcile and return the full report.
    pub async fn reconcile_report(&self) -> Result<ReconcileReport, ServiceError> {
        let report = reconcile_orphans(
            self.blobs.as_ref(),
            self.records.as_ref(),
            self.reconcile_grace_period,
        )
        .await?;
        self.metrics.record_reconciled(report.removed as u64);
        Ok(report)
    }

    /// Resume work left behind by a previous run.
    ///
    /// Records stuck in `processing` longer than the configured threshold are marked failed,
    /// then `pending` records are queued again.
    pub async fn recover(&self) -> Result<RecoveryReport, ServiceError> {
        let everything = Page {
            limit: usize::MAX,
            offset: 0,
        };
        let mut report = RecoveryReport::default();

        let processing = FileFilter {
            status: Some(ProcessingStatus::Processing),
            ..FileFilter::default()
        };
        let cutoff = OffsetDateTime::now_utc() - self.stuck_processing_after;
        for record in self.records.list(&processing, everything).await? {
            if record.updated_at() > cutoff {
                continue;
            }
            if self.pipeline.mark_interrupted(record).await?.is_some() {
                report.interrupted += 1;
            }
        }

        let pending = FileFilter {
            status: Some(ProcessingStatus::Pending),
            ..FileFilter::default()
        };
        for record in self.records.list(&pending, everything).await? {
            let job = ProcessingJob {
                record_id: record.id,
                done: None,
            };
            match self.worker.submit(job) {
                Ok(true) => report.requeued += 1,
                Ok(false) => {}
                Err(_) => {
                    tracing::error!(file_id = %record.id, "Processing worker is not running");
                    break;
                }
            }
        }

        tracing::info!(
            requeued = report.requeued,
            interrupted = report.interrupted,
            "Recovery finished"
        );
        Ok(report)
    }

    /// Current pipeline counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop accepting work and wait for queued and in-flight jobs to finish.
    pub async fn shutdown(self) {
        let Self { worker, drain, .. } = self;
        drop(worker);
        drain.wait().await;
        tracing::debug!("File service stopped");
    }

    async fn store_upload(
        &self,
        bytes: &[u8],
        original_name: &str,
        uploader_id: Uuid,
        project_id: Option<Uuid>,
        task_id: Option<Uuid>,
    ) -> Result<FileRecord, UploadError> {
        let validated = validate_upload(original_name, bytes.len() as u64, self.max_upload_bytes)?;

        let blob = self
            .blobs
            .write(&validated.extension, bytes)
            .await
            .map_err(|err| UploadError::StorageFailure(err.to_string()))?;

        let identity = match compute_identity(
            self.blobs.as_ref(),
            self.sniffer.as_ref(),
            &blob.path,
            bytes,
        )
        .await
        {
            Ok(identity) => identity,
            Err(err) => {
                self.roll_back(&blob.path).await;
                return Err(UploadError::StorageFailure(err.to_string()));
            }
        };

        let mut metadata = Map::new();
        metadata.insert("extension".into(), json!(validated.extension));
        let record = FileRecord::new(NewFileRecord {
            stored_name: blob.stored_name,
            display_name: validated.sanitized_name,
            original_name: original_name.to_string(),
            blob_path: blob.path,
            category: validated.category,
            size_bytes: identity.size_bytes,
            mime_type: identity.mime_type,
            content_hash: identity.content_hash,
            project_id,
            task_id,
            uploader_id,
            metadata: Metadata::from(metadata),
        });

        if let Err(err) = self.records.create(&record).await {
            self.roll_back(&record.blob_path).await;
            return Err(UploadError::StorageFailure(err.to_string()));
        }
        Ok(record)
    }

    async fn roll_back(&self, path: &Path) {
        if let Err(err) = self.blobs.delete(path).await {
            tracing::error!(path = %path.display(), error = %err, "Failed to roll back blob");
        }
    }

    async fn schedule(&self, record: FileRecord) -> UploadReceipt {
        let (done, completion) = oneshot::channel();

        if !record.category.requires_processing() {
            let current = match self.pipeline.process(record.id).await {
                Ok(Some(completed)) => completed,
                Ok(None) => record,
                Err(err) => {
                    tracing::error!(file_id = %record.id, error = %err, "Failed to complete record");
                    record
                }
            };
            let _ = done.send(Some(current.clone()));
            return UploadReceipt::new(current, completion);
        }

        let job = ProcessingJob {
            record_id: record.id,
            done: Some(done),
        };
        if self.worker.submit(job).is_err() {
            // The record stays pending; `recover` will pick it up.
            tracing::error!(file_id = %record.id, "Processing worker is not running");
        }
        UploadReceipt::new(record, completion)
    }
}
