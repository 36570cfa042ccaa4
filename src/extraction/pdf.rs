use super::{CappedText, ExtractionError};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

/// Extract PDF text page by page, skipping pages without text.
///
/// `pdf-extract` can panic on malformed fonts, so parsing runs under `catch_unwind`.
pub(crate) fn extract(path: &Path, max_chars: usize) -> Result<Option<String>, ExtractionError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractionError::read(path, source))?;
    tracing::debug!(path = %path.display(), size_bytes = bytes.len(), "Parsing PDF");

    let pages = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
    }))
    .map_err(|_| ExtractionError::Panicked { format: "PDF" })?
    .map_err(|err| ExtractionError::parse("PDF", err))?;

    let mut text = CappedText::new(max_chars);
    for page in pages.iter().filter(|page| !page.trim().is_empty()) {
        if !text.push(page) {
            break;
        }
    }
    Ok(text.finish())
}
