//! Intake and validation for untrusted uploads.
//!
//! Everything here is pure: it inspects the submitted name and declared size only, so it is
//! safe to call before a single byte touches storage.

pub mod category;
pub mod sanitize;

pub use category::{FileCategory, UnknownCategory, accepted_extensions};
pub use sanitize::{normalized_extension, sanitize_filename};

use thiserror::Error;

/// Reasons an upload is turned away before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeError {
    /// The filename was missing or sanitized down to nothing.
    #[error("Invalid filename: '{0}'")]
    InvalidFilename(String),
    /// Payload exceeds the configured ceiling.
    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    TooLarge {
        /// Size of the submitted payload.
        size: u64,
        /// Configured maximum.
        limit: u64,
    },
    /// Extension is absent from every category's allow-list.
    #[error("Unsupported file type '{extension}'. Accepted: {}", accepted.join(", "))]
    UnsupportedType {
        /// Normalized extension that was rejected (empty when the name had none).
        extension: String,
        /// Every accepted extension, dotted.
        accepted: Vec<String>,
    },
}

/// Outcome of successful intake validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    /// Filesystem-safe display name.
    pub sanitized_name: String,
    /// Category derived from the extension.
    pub category: FileCategory,
    /// Lower-cased extension without the dot.
    pub extension: String,
}

/// Validate an untrusted filename and declared size against the allow-list and ceiling.
pub fn validate_upload(
    original_name: &str,
    size_bytes: u64,
    max_bytes: u64,
) -> Result<ValidatedUpload, IntakeError> {
    if original_name.trim().is_empty() {
        return Err(IntakeError::InvalidFilename(original_name.to_string()));
    }
    if size_bytes > max_bytes {
        return Err(IntakeError::TooLarge {
            size: size_bytes,
            limit: max_bytes,
        });
    }

    let sanitized_name = sanitize_filename(original_name)
        .ok_or_else(|| IntakeError::InvalidFilename(original_name.to_string()))?;
    let extension = normalized_extension(&sanitized_name);
    let category =
        FileCategory::from_extension(&extension).ok_or_else(|| IntakeError::UnsupportedType {
            extension: extension.clone(),
            accepted: accepted_extensions(),
        })?;

    Ok(ValidatedUpload {
        sanitized_name,
        category,
        extension,
    })
}
