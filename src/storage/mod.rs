//! Storage and identity: durable blob placement, content hashing, and MIME detection.

mod blob;
mod identity;
mod mime;

pub use blob::{BlobEntry, BlobStore, BlobStoreError, LocalBlobStore, STAGING_DIR, StoredBlob};
pub use identity::{FileIdentity, IdentityError, compute_identity, digest_bytes, digest_file};
pub use mime::{ContentSniffer, DOCX_MIME, GENERIC_MIME, MimeSniffer, sniff_bytes};
