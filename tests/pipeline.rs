use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docvault::{
    audio::HeaderAudioProbe,
    config::Config,
    intake::FileCategory,
    processing::{Collaborators, FileService, PROCESSING_ERROR_KEY, UploadError},
    records::{
        FileFilter, FileRecord, MemoryRecordStore, NewFileRecord, Page, ProcessingStatus,
        RecordStore, RecordStoreError,
    },
    storage::{BlobStore, ContentSniffer, LocalBlobStore, digest_file},
};
use docx_rs::{Docx, Paragraph, Run};
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

struct Harness {
    _dir: TempDir,
    service: FileService,
    records: Arc<MemoryRecordStore>,
    blobs: Arc<LocalBlobStore>,
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

async fn harness_with(tune: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config {
        upload_dir: dir.path().join("uploads"),
        record_dir: dir.path().join("records"),
        reconcile_grace_period: Duration::ZERO,
        ..Config::default()
    };
    tune(&mut config);

    let blobs = Arc::new(LocalBlobStore::new(&config.upload_dir).await.unwrap());
    let records = Arc::new(MemoryRecordStore::new());
    let service = FileService::new(
        Collaborators {
            records: records.clone(),
            blobs: blobs.clone(),
            sniffer: Arc::new(ContentSniffer),
            audio: Arc::new(HeaderAudioProbe),
        },
        &config,
    );
    Harness {
        _dir: dir,
        service,
        records,
        blobs,
    }
}

fn stored_blob_count(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count()
}

fn everything() -> Page {
    Page {
        limit: usize::MAX,
        offset: 0,
    }
}

#[tokio::test]
async fn text_upload_completes_with_extracted_text() {
    let h = harness().await;
    let uploader = Uuid::new_v4();
    let receipt = h
        .service
        .upload(b"hello world", "notes.txt", uploader, None, None)
        .await
        .unwrap();
    assert_eq!(receipt.record.status(), ProcessingStatus::Pending);
    assert_eq!(receipt.record.category, FileCategory::Document);
    assert_eq!(receipt.record.metadata().get("extension"), Some(&json!("txt")));

    let done = receipt.wait().await.unwrap();
    assert_eq!(done.status(), ProcessingStatus::Completed);
    assert_eq!(done.extracted_text(), Some("hello world"));
    assert_eq!(done.metadata().get("text_length"), Some(&json!(11)));
    assert_eq!(done.mime_type, "text/plain");
    assert_eq!(done.uploader_id, uploader);
}

#[tokio::test]
async fn csv_upload_renders_headers_and_rows() {
    let h = harness().await;
    let done = h
        .service
        .upload_and_wait(b"a,b\n1,2\n3,4\n", "table.csv", Uuid::new_v4(), None, None)
        .await
        .unwrap();
    assert_eq!(done.status(), ProcessingStatus::Completed);
    let text = done.extracted_text().unwrap();
    assert!(text.starts_with("Headers: a, b\nRow 1: 1, 2\nRow 2: 3, 4"));
}

#[tokio::test]
async fn markdown_upload_is_cleaned() {
    let h = harness().await;
    let done = h
        .service
        .upload_and_wait(
            b"# Title\n\nSee [the docs](https://example.com) for **more**.\n",
            "readme.md",
            Uuid::new_v4(),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(done.status(), ProcessingStatus::Completed);
    let text = done.extracted_text().unwrap();
    assert!(text.contains("Title"));
    assert!(text.contains("See the docs for more."));
    assert!(!text.contains('#'));
}

#[tokio::test]
async fn docx_upload_extracts_paragraphs() {
    let h = harness().await;
    let mut buffer = Cursor::new(Vec::new());
    Docx::new()
        .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Quarterly report")))
        .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Revenue grew")))
        .build()
        .pack(&mut buffer)
        .unwrap();

    let done = h
        .service
        .upload_and_wait(buffer.get_ref(), "report.docx", Uuid::new_v4(), None, None)
        .await
        .unwrap();
    assert_eq!(done.status(), ProcessingStatus::Completed);
    assert_eq!(done.extracted_text(), Some("Quarterly report\nRevenue grew"));
}

#[tokio::test]
async fn corrupt_pdf_fails_with_reason() {
    let h = harness().await;
    let done = h
        .service
        .upload_and_wait(
            b"%PDF-1.4\nthis is not really a pdf",
            "broken.pdf",
            Uuid::new_v4(),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(done.status(), ProcessingStatus::Failed);
    assert!(done.metadata().get(PROCESSING_ERROR_KEY).is_some());
    assert!(done.extracted_text().is_none());
}

#[tokio::test]
async fn rejected_extension_leaves_nothing_behind() {
    let h = harness().await;
    let err = h
        .service
        .upload(b"MZ\x90\x00", "setup.exe", Uuid::new_v4(), None, None)
        .await
        .unwrap_err();
    match err {
        UploadError::UnsupportedType {
            extension,
            accepted,
        } => {
            assert_eq!(extension, "exe");
            assert!(accepted.contains(&".pdf".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.records.is_empty().await);
    assert_eq!(stored_blob_count(h.blobs.root()), 0);
    assert_eq!(h.service.metrics_snapshot().uploads_rejected, 1);
}

#[tokio::test]
async fn oversized_upload_leaves_nothing_behind() {
    let h = harness_with(|config| config.max_upload_bytes = 8).await;
    let err = h
        .service
        .upload(b"more than eight bytes", "big.txt", Uuid::new_v4(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::TooLarge { limit: 8, .. }));
    assert!(err.is_client_error());
    assert!(h.records.is_empty().await);
    assert_eq!(stored_blob_count(h.blobs.root()), 0);
}

#[tokio::test]
async fn unusable_filename_is_rejected() {
    let h = harness().await;
    let err = h
        .service
        .upload(b"data", "../..", Uuid::new_v4(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidFilename(_)));
}

#[tokio::test]
async fn image_completes_without_processing() {
    let h = harness().await;
    let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";
    let receipt = h
        .service
        .upload(png, "pixel.png", Uuid::new_v4(), None, None)
        .await
        .unwrap();
    assert_eq!(receipt.record.status(), ProcessingStatus::Completed);
    assert_eq!(receipt.record.category, FileCategory::Image);
    assert_eq!(receipt.record.mime_type, "image/png");
    assert!(receipt.record.extracted_text().is_none());

    let done = receipt.wait().await.unwrap();
    assert_eq!(done.status(), ProcessingStatus::Completed);
}

#[tokio::test]
async fn wav_upload_merges_audio_metadata() {
    let h = harness().await;
    let sample_rate = 8000u32;
    let data_len = sample_rate * 2;
    let mut wav = Vec::new();
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.resize(wav.len() + data_len as usize, 0);

    let done = h
        .service
        .upload_and_wait(&wav, "memo.wav", Uuid::new_v4(), None, None)
        .await
        .unwrap();
    assert_eq!(done.category, FileCategory::Audio);
    assert_eq!(done.status(), ProcessingStatus::Completed);
    assert_eq!(done.metadata().get("audio_format"), Some(&json!("wav")));
    assert_eq!(done.metadata().get("sample_rate"), Some(&json!(8000)));
    assert_eq!(done.metadata().get("duration_seconds"), Some(&json!(1.0)));
    assert_eq!(done.metadata().get("extension"), Some(&json!("wav")));
}

#[tokio::test]
async fn content_hash_matches_stored_bytes() {
    let h = harness().await;
    let done = h
        .service
        .upload_and_wait(b"hello world", "hash.txt", Uuid::new_v4(), None, None)
        .await
        .unwrap();
    assert_eq!(
        done.content_hash,
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
    assert_eq!(digest_file(&done.blob_path).await.unwrap(), done.content_hash);
    assert_eq!(done.size_bytes, 11);
}

#[tokio::test]
async fn long_text_is_capped_to_a_prefix() {
    let h = harness().await;
    let body: String = (0..60_000)
        .map(|i| char::from(b'a' + (i % 26) as u8))
        .collect();
    let done = h
        .service
        .upload_and_wait(body.as_bytes(), "long.txt", Uuid::new_v4(), None, None)
        .await
        .unwrap();
    let text = done.extracted_text().unwrap();
    assert_eq!(text.chars().count(), 50_000);
    assert!(body.starts_with(text));
}

#[tokio::test]
async fn hostile_names_are_sanitized() {
    let h = harness().await;
    for name in ["../../etc/passwd.txt", "..\\..\\boot.ini.txt", "a/b/c.md"] {
        let done = h
            .service
            .upload_and_wait(b"content", name, Uuid::new_v4(), None, None)
            .await
            .unwrap();
        assert!(!done.display_name.contains('/'));
        assert!(!done.display_name.contains('\\'));
        assert!(!done.display_name.starts_with('.'));
        assert_eq!(done.original_name, name);
        assert!(done.blob_path.starts_with(h.blobs.root()));
    }
}

#[tokio::test]
async fn delete_removes_record_and_blob() {
    let h = harness().await;
    let done = h
        .service
        .upload_and_wait(b"bye", "gone.txt", Uuid::new_v4(), None, None)
        .await
        .unwrap();
    assert!(done.blob_path.exists());

    assert!(h.service.delete_file(done.id).await.unwrap());
    assert!(h.service.get_file(done.id).await.unwrap().is_none());
    assert!(!done.blob_path.exists());
    assert!(!h.service.delete_file(done.id).await.unwrap());
}

#[tokio::test]
async fn reconcile_removes_orphans_once() {
    let h = harness().await;
    let kept = h
        .service
        .upload_and_wait(b"kept", "kept.txt", Uuid::new_v4(), None, None)
        .await
        .unwrap();
    let orphan = h.blobs.write("txt", b"orphan").await.unwrap();

    assert_eq!(h.service.reconcile().await.unwrap(), 1);
    assert!(!orphan.path.exists());
    assert!(kept.blob_path.exists());
    assert_eq!(h.service.reconcile().await.unwrap(), 0);
    assert_eq!(h.service.metrics_snapshot().blobs_reconciled, 1);
}

#[tokio::test]
async fn list_filters_and_pages_newest_first() {
    let h = harness().await;
    let project = Uuid::new_v4();
    let uploader = Uuid::new_v4();
    for name in ["one.txt", "two.txt", "three.txt"] {
        h.service
            .upload_and_wait(b"text", name, uploader, Some(project), None)
            .await
            .unwrap();
    }
    h.service
        .upload_and_wait(b"elsewhere", "other.txt", uploader, None, None)
        .await
        .unwrap();

    let filter = FileFilter {
        project_id: Some(project),
        ..FileFilter::default()
    };
    let all = h.service.list_files(&filter, everything()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|pair| pair[0].created_at >= pair[1].created_at));

    let page = h
        .service
        .list_files(&filter, Page { limit: 2, offset: 2 })
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, all[2].id);

    let completed = FileFilter {
        status: Some(ProcessingStatus::Completed),
        category: Some(FileCategory::Document),
        uploader_id: Some(uploader),
        ..FileFilter::default()
    };
    assert_eq!(
        h.service.list_files(&completed, everything()).await.unwrap().len(),
        4
    );
}

fn stranded_record(blob_path: &Path) -> FileRecord {
    FileRecord::new(NewFileRecord {
        stored_name: "stranded.txt".into(),
        display_name: "stranded.txt".into(),
        original_name: "stranded.txt".into(),
        blob_path: blob_path.to_path_buf(),
        category: FileCategory::Document,
        size_bytes: 4,
        mime_type: "text/plain".into(),
        content_hash: String::new(),
        project_id: None,
        task_id: None,
        uploader_id: Uuid::new_v4(),
        metadata: Default::default(),
    })
}

#[tokio::test]
async fn recover_requeues_pending_and_fails_stuck_records() {
    let h = harness_with(|config| config.stuck_processing_after = Duration::ZERO).await;
    let pending_blob = h.blobs.write("txt", b"left").await.unwrap();
    let pending = stranded_record(&pending_blob.path);
    h.records.create(&pending).await.unwrap();

    let mut stuck = stranded_record(&h.blobs.root().join("stuck.txt"));
    stuck.advance(ProcessingStatus::Processing).unwrap();
    h.records.create(&stuck).await.unwrap();

    let report = h.service.recover().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.interrupted, 1);

    let failed = h.service.get_file(stuck.id).await.unwrap().unwrap();
    assert_eq!(failed.status(), ProcessingStatus::Failed);
    assert_eq!(
        failed.metadata().get(PROCESSING_ERROR_KEY),
        Some(&json!("processing interrupted"))
    );

    let records = h.records.clone();
    h.service.shutdown().await;
    let resumed = records.get(pending.id).await.unwrap().unwrap();
    assert_eq!(resumed.status(), ProcessingStatus::Completed);
    assert_eq!(resumed.extracted_text(), Some("left"));
}

/// Record store whose inserts always fail.
struct RejectingRecords(MemoryRecordStore);

#[async_trait]
impl RecordStore for RejectingRecords {
    async fn create(&self, _record: &FileRecord) -> Result<(), RecordStoreError> {
        Err(RecordStoreError::Io(std::io::Error::other("disk full")))
    }

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, RecordStoreError> {
        self.0.get(id).await
    }

    async fn update(&self, record: &FileRecord) -> Result<(), RecordStoreError> {
        self.0.update(record).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RecordStoreError> {
        self.0.delete(id).await
    }

    async fn list(
        &self,
        filter: &FileFilter,
        page: Page,
    ) -> Result<Vec<FileRecord>, RecordStoreError> {
        self.0.list(filter, page).await
    }

    async fn blob_paths(&self) -> Result<HashSet<PathBuf>, RecordStoreError> {
        self.0.blob_paths().await
    }
}

#[tokio::test]
async fn record_failure_rolls_back_the_blob() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        upload_dir: dir.path().join("uploads"),
        ..Config::default()
    };
    let blobs = Arc::new(LocalBlobStore::new(&config.upload_dir).await.unwrap());
    let service = FileService::new(
        Collaborators {
            records: Arc::new(RejectingRecords(MemoryRecordStore::new())),
            blobs: blobs.clone(),
            sniffer: Arc::new(ContentSniffer),
            audio: Arc::new(HeaderAudioProbe),
        },
        &config,
    );

    let err = service
        .upload(b"hello world", "notes.txt", Uuid::new_v4(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::StorageFailure(_)));
    assert!(!err.is_client_error());
    assert_eq!(stored_blob_count(blobs.root()), 0);
    assert_eq!(service.metrics_snapshot().uploads_rejected, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recover_during_processing_never_reports_unfinished_records() {
    let h = harness().await;
    for i in 0..30 {
        let receipt = h
            .service
            .upload(
                b"a,b\n1,2\n3,4\n",
                &format!("batch-{i}.csv"),
                Uuid::new_v4(),
                None,
                None,
            )
            .await
            .unwrap();
        h.service.recover().await.unwrap();

        let done = receipt.wait().await.unwrap();
        assert!(done.status().is_terminal(), "got {}", done.status());
        let stored = h.service.get_file(done.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), done.status());
    }
}
