use super::{CappedText, ExtractionError};
use std::path::Path;

/// Read a file as UTF-8, falling back to Latin-1 when it is not valid UTF-8.
pub(crate) fn read_text(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractionError::read(path, source))?;
    Ok(decode(bytes))
}

pub(crate) fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        // Every byte is a valid Latin-1 code point.
        Err(err) => err.into_bytes().into_iter().map(char::from).collect(),
    }
}

pub(crate) fn extract(path: &Path, max_chars: usize) -> Result<Option<String>, ExtractionError> {
    let content = read_text(path)?;
    let mut text = CappedText::new(max_chars);
    text.push(&content);
    Ok(text.finish())
}
