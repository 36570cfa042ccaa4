//! Physical identity of a stored blob: size, MIME type and content digest.

use crate::storage::{BlobStore, MimeSniffer};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncReadExt;

const DIGEST_CHUNK_BYTES: usize = 8192;

/// Errors that prevent an identity from being trusted.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The blob could not be read while hashing.
    #[error("Failed to hash {}: {source}", path.display())]
    Digest {
        /// Blob being hashed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Size of the blob could not be determined.
    #[error("Failed to stat blob: {0}")]
    Size(#[from] crate::storage::BlobStoreError),
    /// What is on disk disagrees with what was written.
    #[error("Stored blob does not match the uploaded bytes: {0}")]
    Mismatch(String),
}

/// Facts computed from the bytes actually on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    /// Sniffed MIME type, or the generic binary type.
    pub mime_type: String,
    /// Byte size of the stored file.
    pub size_bytes: u64,
    /// Lower-case hex SHA-256 of the full content.
    pub content_hash: String,
}

/// Hash a file in fixed-size chunks so memory use does not grow with file size.
pub async fn digest_file(path: &Path) -> Result<String, IdentityError> {
    let wrap = |source| IdentityError::Digest {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::open(path).await.map_err(wrap)?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; DIGEST_CHUNK_BYTES];
    loop {
        let read = file.read(&mut chunk).await.map_err(wrap)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash an in-memory buffer with the same digest used for stored blobs.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compute the identity of a freshly stored blob and check it against the uploaded bytes.
///
/// MIME sniffing never fails; size and digest failures, or any disagreement between the disk
/// and `expected`, are errors so the caller can roll the blob back.
pub async fn compute_identity(
    blobs: &dyn BlobStore,
    sniffer: &dyn MimeSniffer,
    path: &Path,
    expected: &[u8],
) -> Result<FileIdentity, IdentityError> {
    let size_bytes = blobs.size(path).await?;
    if size_bytes != expected.len() as u64 {
        return Err(IdentityError::Mismatch(format!(
            "size on disk {size_bytes} != uploaded {}",
            expected.len()
        )));
    }

    let content_hash = digest_file(path).await?;
    if content_hash != digest_bytes(expected) {
        return Err(IdentityError::Mismatch("content digest differs".into()));
    }

    let mime_type = sniffer.sniff(path).await;
    Ok(FileIdentity {
        mime_type,
        size_bytes,
        content_hash,
    })
}
