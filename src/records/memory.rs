use super::types::paginate;
use super::{FileFilter, FileRecord, Page, RecordStore, RecordStoreError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process record store, used by tests and embedders that bring their own persistence.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<Uuid, FileRecord>>,
}

impl MemoryRecordStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: &FileRecord) -> Result<(), RecordStoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(RecordStoreError::Duplicate(record.id));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, RecordStoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update(&self, record: &FileRecord) -> Result<(), RecordStoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(RecordStoreError::NotFound(record.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RecordStoreError> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn list(
        &self,
        filter: &FileFilter,
        page: Page,
    ) -> Result<Vec<FileRecord>, RecordStoreError> {
        let matching = self
            .records
            .read()
            .await
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        Ok(paginate(matching, page))
    }

    async fn blob_paths(&self) -> Result<HashSet<PathBuf>, RecordStoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .map(|record| record.blob_path.clone())
            .collect())
    }
}
