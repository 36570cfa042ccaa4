//! Extension allow-list and coarse file classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Coarse classification used to select processing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    /// Text-bearing documents that go through extraction.
    Document,
    /// Audio recordings whose metadata is probed.
    Audio,
    /// Images; stored only.
    Image,
    /// Allowed files with no processing behavior.
    Other,
}

/// Allowed extensions per category, lower-cased and without the leading dot.
const ALLOWED_EXTENSIONS: &[(FileCategory, &[&str])] = &[
    (FileCategory::Document, &["pdf", "docx", "txt", "csv", "md"]),
    (FileCategory::Audio, &["mp3", "wav", "m4a"]),
    (FileCategory::Image, &["jpg", "jpeg", "png", "gif"]),
    (FileCategory::Other, &["zip", "json", "xml"]),
];

impl FileCategory {
    /// Classify an already normalized extension, or `None` when it is not on any allow-list.
    pub fn from_extension(extension: &str) -> Option<Self> {
        ALLOWED_EXTENSIONS
            .iter()
            .find(|(_, extensions)| extensions.contains(&extension))
            .map(|(category, _)| *category)
    }

    /// Whether records in this category pass through `processing` after creation.
    pub fn requires_processing(self) -> bool {
        matches!(self, Self::Document | Self::Audio)
    }

    /// Stable lower-case name used in storage and filters.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Other => "other",
        }
    }
}

/// Every accepted extension, dotted, in allow-list order.
pub fn accepted_extensions() -> Vec<String> {
    ALLOWED_EXTENSIONS
        .iter()
        .flat_map(|(_, extensions)| extensions.iter().map(|ext| format!(".{ext}")))
        .collect()
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a category name cannot be parsed.
#[derive(Debug, Error)]
#[error("unknown file category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for FileCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "document" => Ok(Self::Document),
            "audio" => Ok(Self::Audio),
            "image" => Ok(Self::Image),
            "other" => Ok(Self::Other),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}
