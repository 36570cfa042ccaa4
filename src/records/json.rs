use super::types::paginate;
use super::{FileFilter, FileRecord, Page, RecordStore, RecordStoreError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Record store keeping one `<id>.json` document per record in a directory.
///
/// Each write goes to a temporary sibling that is synced and renamed over the target, so a
/// reader never observes a half-written record. Mutations hold a store-wide lock across their
/// existence check and rename, so an update can never resurrect a concurrently deleted record.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    dir: PathBuf,
    mutations: Arc<Mutex<()>>,
}

impl JsonRecordStore {
    /// Open (creating if needed) a store in `dir`.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, RecordStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            mutations: Arc::new(Mutex::new(())),
        })
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write_record(&self, record: &FileRecord) -> Result<(), RecordStoreError> {
        let target = self.record_path(record.id);
        let temp = self.dir.join(format!(".{}.{}.tmp", record.id, Uuid::new_v4()));
        let encoded = serde_json::to_vec_pretty(record)?;

        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&encoded).await?;
            file.sync_all().await?;
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Read every stored record.
    ///
    /// With `skip_corrupt`, unreadable records are logged and left out; otherwise the first one
    /// aborts the load.
    async fn load_all(&self, skip_corrupt: bool) -> Result<Vec<FileRecord>, RecordStoreError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_record_file(&path) {
                continue;
            }
            match read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) if skip_corrupt => {
                    tracing::warn!(path = %path.display(), error = %err, "Skipping unreadable record");
                }
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "Unreadable record");
                    return Err(err);
                }
            }
        }
        Ok(records)
    }
}

fn is_record_file(path: &Path) -> bool {
    let named_json = path.extension().is_some_and(|ext| ext == "json");
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'));
    named_json && !hidden
}

async fn read_record(path: &Path) -> Result<Option<FileRecord>, RecordStoreError> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| RecordStoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
        // Deleted between listing and reading.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn create(&self, record: &FileRecord) -> Result<(), RecordStoreError> {
        let _guard = self.mutations.lock().await;
        if fs::try_exists(self.record_path(record.id)).await? {
            return Err(RecordStoreError::Duplicate(record.id));
        }
        self.write_record(record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, RecordStoreError> {
        read_record(&self.record_path(id)).await
    }

    async fn update(&self, record: &FileRecord) -> Result<(), RecordStoreError> {
        let _guard = self.mutations.lock().await;
        if !fs::try_exists(self.record_path(record.id)).await? {
            return Err(RecordStoreError::NotFound(record.id));
        }
        self.write_record(record).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RecordStoreError> {
        let _guard = self.mutations.lock().await;
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(
        &self,
        filter: &FileFilter,
        page: Page,
    ) -> Result<Vec<FileRecord>, RecordStoreError> {
        let matching = self
            .load_all(true)
            .await?
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();
        Ok(paginate(matching, page))
    }

    async fn blob_paths(&self) -> Result<HashSet<PathBuf>, RecordStoreError> {
        Ok(self
            .load_all(false)
            .await?
            .into_iter()
            .map(|record| record.blob_path)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::FileCategory;
    use crate::records::ProcessingStatus;
    use crate::records::fixtures::new_record;
    use tempfile::TempDir;

    #[tokio::test]
    async fn persists_records_across_instances() {
        let dir = TempDir::new().unwrap();
        let mut record = new_record(FileCategory::Document);
        {
            let store = JsonRecordStore::new(dir.path()).await.unwrap();
            store.create(&record).await.unwrap();
            record.advance(ProcessingStatus::Processing).unwrap();
            store.update(&record).await.unwrap();
        }

        let reopened = JsonRecordStore::new(dir.path()).await.unwrap();
        let fetched = reopened.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.status(), ProcessingStatus::Processing);
        assert_eq!(
            reopened.blob_paths().await.unwrap(),
            HashSet::from([record.blob_path.clone()])
        );
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path()).await.unwrap();
        let record = new_record(FileCategory::Image);
        assert!(matches!(
            store.update(&record).await,
            Err(RecordStoreError::NotFound(id)) if id == record.id
        ));
    }

    #[tokio::test]
    async fn list_skips_corrupt_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path()).await.unwrap();
        store.create(&new_record(FileCategory::Other)).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let listed = store
            .list(&crate::records::FileFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn blob_paths_refuses_to_skip_corrupt_records() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path()).await.unwrap();
        let record = new_record(FileCategory::Document);
        store.create(&record).await.unwrap();
        std::fs::write(dir.path().join(format!("{}.json", record.id)), b"{ truncated").unwrap();

        assert!(matches!(
            store.blob_paths().await,
            Err(RecordStoreError::Corrupt { .. })
        ));
        assert!(store.list(&FileFilter::default(), Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn update_racing_delete_never_resurrects_the_record() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path()).await.unwrap();
        for _ in 0..25 {
            let mut record = new_record(FileCategory::Document);
            store.create(&record).await.unwrap();
            record.advance(ProcessingStatus::Processing).unwrap();
            let id = record.id;

            let updater = store.clone();
            let update = tokio::spawn(async move { updater.update(&record).await });
            let deleter = store.clone();
            let delete = tokio::spawn(async move { deleter.delete(id).await });

            let update = update.await.unwrap();
            assert!(delete.await.unwrap().unwrap());
            assert!(matches!(
                update,
                Ok(()) | Err(RecordStoreError::NotFound(_))
            ));
            assert!(store.get(id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path()).await.unwrap();
        let record = new_record(FileCategory::Audio);
        store.create(&record).await.unwrap();
        assert!(store.delete(record.id).await.unwrap());
        assert!(!store.delete(record.id).await.unwrap());
        assert!(store.get(record.id).await.unwrap().is_none());
    }
}
