use super::{CappedText, ExtractionError};
use docx_rs::{DocumentChild, Paragraph, ParagraphChild, RunChild};
use std::path::Path;

/// Extract body paragraphs, skipping those that are blank after trimming.
pub(crate) fn extract(path: &Path, max_chars: usize) -> Result<Option<String>, ExtractionError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractionError::read(path, source))?;
    let document = docx_rs::read_docx(&bytes).map_err(|err| ExtractionError::parse("DOCX", err))?;

    let mut text = CappedText::new(max_chars);
    for child in &document.document.children {
        let DocumentChild::Paragraph(paragraph) = child else {
            continue;
        };
        let line = paragraph_text(paragraph);
        if line.trim().is_empty() {
            continue;
        }
        if !text.push(&line) {
            break;
        }
    }
    Ok(text.finish())
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut line = String::new();
    for child in &paragraph.children {
        match child {
            ParagraphChild::Run(run) => push_runs(&run.children, &mut line),
            ParagraphChild::Hyperlink(link) => {
                for inner in &link.children {
                    if let ParagraphChild::Run(run) = inner {
                        push_runs(&run.children, &mut line);
                    }
                }
            }
            _ => {}
        }
    }
    line
}

fn push_runs(children: &[RunChild], line: &mut String) {
    for child in children {
        match child {
            RunChild::Text(text) => line.push_str(&text.text),
            RunChild::Tab(_) => line.push('\t'),
            _ => {}
        }
    }
}
