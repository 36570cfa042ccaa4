//! Extraction engine: MIME-dispatched text extraction with a shared length cap.
//!
//! Every extractor is a plain synchronous function over its own file handle, so unrelated
//! files can be extracted concurrently on blocking threads without shared locks. Results are
//! explicit: `Ok(Some(text))`, `Ok(None)` when the file holds no text, or a typed error.

mod csv;
mod docx;
mod markdown;
mod pdf;
mod plain;
mod summary;

pub use csv::sniff_delimiter;
pub use markdown::clean_markdown;
pub use summary::summarize_text;

use crate::storage::DOCX_MIME;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures raised while extracting text from a single file.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        /// File being extracted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file was read but its format could not be parsed.
    #[error("Failed to parse {format}: {message}")]
    Parse {
        /// Format being parsed.
        format: &'static str,
        /// Parser diagnostic.
        message: String,
    },
    /// The parser panicked on malformed input.
    #[error("{format} parser panicked on malformed input")]
    Panicked {
        /// Format being parsed.
        format: &'static str,
    },
}

impl ExtractionError {
    pub(crate) fn read(path: &Path, source: std::io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(format: &'static str, message: impl ToString) -> Self {
        Self::Parse {
            format,
            message: message.to_string(),
        }
    }
}

/// Converts stored documents into bounded plain text.
#[derive(Debug, Clone, Copy)]
pub struct TextExtractor {
    max_chars: usize,
}

impl TextExtractor {
    /// Extractor whose output never exceeds `max_chars` characters.
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Character cap applied to every format.
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Extract text from `path`, choosing the format by `mime_type`.
    ///
    /// Unrecognized MIME types are read as plain text. Failures are logged here and returned
    /// to the caller, which decides the record's terminal state.
    pub fn extract(&self, path: &Path, mime_type: &str) -> Result<Option<String>, ExtractionError> {
        let base = mime_type
            .split(';')
            .next()
            .unwrap_or(mime_type)
            .trim()
            .to_ascii_lowercase();
        let result = match base.as_str() {
            "application/pdf" => pdf::extract(path, self.max_chars),
            DOCX_MIME => docx::extract(path, self.max_chars),
            "text/csv" => csv::extract(path, self.max_chars),
            "text/markdown" => markdown::extract(path, self.max_chars),
            _ => plain::extract(path, self.max_chars),
        };

        match &result {
            Ok(text) => tracing::debug!(
                path = %path.display(),
                mime_type = %base,
                chars = text.as_ref().map_or(0, |text| text.chars().count()),
                "Extraction finished"
            ),
            Err(err) => tracing::warn!(
                path = %path.display(),
                mime_type = %base,
                error = %err,
                "Extraction failed"
            ),
        }
        result
    }
}

/// Accumulates newline-separated parts and stops once the character cap is exceeded,
/// keeping exactly the first `cap` characters.
#[derive(Debug)]
pub(crate) struct CappedText {
    text: String,
    chars: usize,
    parts: usize,
    cap: usize,
    truncated: bool,
}

impl CappedText {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            parts: 0,
            cap,
            truncated: false,
        }
    }

    /// Append a part; returns `false` once the cap has been hit and further input is ignored.
    pub(crate) fn push(&mut self, part: &str) -> bool {
        if self.truncated {
            return false;
        }
        if self.parts > 0 {
            self.text.push('\n');
            self.chars += 1;
        }
        self.text.push_str(part);
        self.chars += part.chars().count();
        self.parts += 1;

        if self.chars > self.cap {
            if let Some((index, _)) = self.text.char_indices().nth(self.cap) {
                self.text.truncate(index);
            }
            self.chars = self.cap;
            self.truncated = true;
            return false;
        }
        true
    }

    /// Whether the cap cut the output short.
    pub(crate) fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Final text, or `None` when nothing but whitespace was collected.
    pub(crate) fn finish(self) -> Option<String> {
        (!self.text.trim().is_empty()).then_some(self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn capped_text_joins_parts_with_newlines() {
        let mut text = CappedText::new(100);
        assert!(text.push("one"));
        assert!(text.push("two"));
        assert_eq!(text.finish().as_deref(), Some("one\ntwo"));
    }

    #[test]
    fn capped_text_keeps_exact_prefix() {
        let mut text = CappedText::new(5);
        assert!(text.push("abc"));
        assert!(!text.push("defgh"));
        assert!(text.is_truncated());
        assert!(!text.push("ignored"));
        assert_eq!(text.finish().as_deref(), Some("abc\nd"));
    }

    #[test]
    fn capped_text_counts_characters_not_bytes() {
        let mut text = CappedText::new(3);
        text.push("ééééé");
        assert_eq!(text.finish().as_deref(), Some("ééé"));
    }

    #[test]
    fn capped_text_at_exact_cap_is_untouched() {
        let mut text = CappedText::new(3);
        assert!(text.push("abc"));
        assert_eq!(text.finish().as_deref(), Some("abc"));
    }

    #[test]
    fn whitespace_only_output_is_absent() {
        let mut text = CappedText::new(10);
        text.push("  ");
        text.push("");
        assert_eq!(text.finish(), None);
    }

    #[test]
    fn unknown_mime_falls_back_to_plain_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"readable after all").unwrap();
        let extracted = TextExtractor::new(100)
            .extract(&path, "application/octet-stream")
            .unwrap();
        assert_eq!(extracted.as_deref(), Some("readable after all"));
    }

    #[test]
    fn mime_parameters_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();
        let extracted = TextExtractor::new(100)
            .extract(&path, "text/csv; charset=utf-8")
            .unwrap();
        assert_eq!(extracted.as_deref(), Some("Headers: a, b\nRow 1: 1, 2"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = TextExtractor::new(100)
            .extract(Path::new("/no/such/file.txt"), "text/plain")
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Read { .. }));
    }
}
