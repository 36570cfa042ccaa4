//! Durable blob placement under a single root directory.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::{Instant, SystemTime};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use walkdir::WalkDir;

/// Directory under the root that holds in-flight writes; never enumerated.
pub const STAGING_DIR: &str = ".staging";

/// Errors raised by blob store implementations.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// Extension could not be used to build a stored name.
    #[error("Invalid blob extension '{0}'")]
    InvalidExtension(String),
    /// Path does not resolve inside the storage root.
    #[error("Path {} is outside the storage root", .0.display())]
    OutsideRoot(PathBuf),
    /// Blob does not exist.
    #[error("Blob {} not found", .0.display())]
    NotFound(PathBuf),
    /// Filesystem operation failed.
    #[error("Storage I/O failed for {}: {source}", path.display())]
    Io {
        /// Path involved in the failing operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Blocking enumeration task panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl BlobStoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A blob that landed at its final path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Final location of the blob.
    pub path: PathBuf,
    /// Collision-resistant file name (`<uuid>.<extension>`).
    pub stored_name: String,
    /// Number of bytes written.
    pub size_bytes: u64,
}

/// One file found while enumerating the store.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    /// Location of the blob.
    pub path: PathBuf,
    /// Last modification time reported by the filesystem.
    pub modified: SystemTime,
}

/// Storage for raw upload bytes, addressed by path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Root directory owning every blob.
    fn root(&self) -> &Path;

    /// Write `bytes` to a fresh path whose name ignores the submitted filename.
    async fn write(&self, extension: &str, bytes: &[u8]) -> Result<StoredBlob, BlobStoreError>;

    /// Whether a blob exists at `path`.
    async fn exists(&self, path: &Path) -> Result<bool, BlobStoreError>;

    /// Size of the blob on disk.
    async fn size(&self, path: &Path) -> Result<u64, BlobStoreError>;

    /// Delete a blob, returning `false` when it was already gone.
    async fn delete(&self, path: &Path) -> Result<bool, BlobStoreError>;

    /// Enumerate every committed blob under the root, recursively.
    async fn list(&self) -> Result<Vec<BlobEntry>, BlobStoreError>;
}

/// Blob store backed by a local directory.
///
/// Writes are staged in [`STAGING_DIR`], synced, then renamed into place so a crash never
/// leaves a partial file at a final path.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, BlobStoreError> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&staging)
            .await
            .map_err(|source| BlobStoreError::io(&staging, source))?;
        tracing::debug!(root = %root.display(), "Blob store ready");
        Ok(Self { root })
    }

    fn contained(&self, path: &Path) -> Result<(), BlobStoreError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| BlobStoreError::OutsideRoot(path.to_path_buf()))?;
        let mut components = relative.components().peekable();
        if components.peek().is_none()
            || !components.all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(BlobStoreError::OutsideRoot(path.to_path_buf()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn write(&self, extension: &str, bytes: &[u8]) -> Result<StoredBlob, BlobStoreError> {
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BlobStoreError::InvalidExtension(extension.to_string()));
        }

        let token = Uuid::new_v4();
        let stored_name = format!("{token}.{}", extension.to_ascii_lowercase());
        let staging_path = self.root.join(STAGING_DIR).join(format!("{token}.part"));
        let final_path = self.root.join(&stored_name);
        let start = Instant::now();

        if let Err(err) = write_synced(&staging_path, bytes).await {
            discard(&staging_path).await;
            return Err(err);
        }
        if let Err(source) = fs::rename(&staging_path, &final_path).await {
            discard(&staging_path).await;
            return Err(BlobStoreError::io(&final_path, source));
        }

        tracing::debug!(
            path = %final_path.display(),
            size_bytes = bytes.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Blob written"
        );

        Ok(StoredBlob {
            path: final_path,
            stored_name,
            size_bytes: bytes.len() as u64,
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool, BlobStoreError> {
        self.contained(path)?;
        fs::try_exists(path)
            .await
            .map_err(|source| BlobStoreError::io(path, source))
    }

    async fn size(&self, path: &Path) -> Result<u64, BlobStoreError> {
        self.contained(path)?;
        match fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(path.to_path_buf()))
            }
            Err(source) => Err(BlobStoreError::io(path, source)),
        }
    }

    async fn delete(&self, path: &Path) -> Result<bool, BlobStoreError> {
        self.contained(path)?;
        match fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Blob deleted");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(BlobStoreError::io(path, source)),
        }
    }

    async fn list(&self) -> Result<Vec<BlobEntry>, BlobStoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || enumerate(&root))
            .await
            .map_err(|err| BlobStoreError::Task(err.to_string()))
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), BlobStoreError> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|source| BlobStoreError::io(path, source))?;
    file.write_all(bytes)
        .await
        .map_err(|source| BlobStoreError::io(path, source))?;
    file.sync_all()
        .await
        .map_err(|source| BlobStoreError::io(path, source))
}

async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Failed to remove partial blob");
        }
    }
}

fn enumerate(root: &Path) -> Vec<BlobEntry> {
    if !root.exists() {
        return Vec::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !(entry.depth() == 1 && entry.file_name() == STAGING_DIR))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping unreadable storage entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|metadata| metadata.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            BlobEntry {
                path: entry.into_path(),
                modified,
            }
        })
        .collect()
}
