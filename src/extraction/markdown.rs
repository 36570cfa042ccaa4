use super::{CappedText, ExtractionError, plain};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

pub(crate) fn extract(path: &Path, max_chars: usize) -> Result<Option<String>, ExtractionError> {
    let content = plain::read_text(path)?;
    let mut text = CappedText::new(max_chars);
    for line in CleanLines::new(&content) {
        if !text.push(&line) {
            break;
        }
    }
    Ok(text.finish())
}

/// Strip Markdown formatting while keeping line structure.
///
/// Heading markers, fenced code blocks (fences and contents), inline code backticks, and
/// `*`/`_` emphasis markers are removed; links and images are replaced by their text.
pub fn clean_markdown(content: &str) -> String {
    CleanLines::new(content).collect::<Vec<_>>().join("\n")
}

struct CleanLines<'a> {
    lines: std::str::Lines<'a>,
    in_fence: bool,
}

impl<'a> CleanLines<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            lines: content.lines(),
            in_fence: false,
        }
    }
}

impl Iterator for CleanLines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                self.in_fence = !self.in_fence;
                continue;
            }
            if self.in_fence {
                continue;
            }
            return Some(clean_line(line));
        }
    }
}

fn link_pattern() -> &'static Regex {
    static LINK: OnceLock<Regex> = OnceLock::new();
    LINK.get_or_init(|| Regex::new(r"!?\[([^\]]+)\]\([^)]*\)").expect("valid link regex"))
}

fn emphasis_pattern() -> &'static Regex {
    static EMPHASIS: OnceLock<Regex> = OnceLock::new();
    // Underscores only count as emphasis at word edges so snake_case survives.
    EMPHASIS.get_or_init(|| {
        Regex::new(r"\*+|(^|\W)_{1,2}|_{1,2}(\W|$)").expect("valid emphasis regex")
    })
}

fn clean_line(line: &str) -> String {
    let trimmed = line.trim_start();
    let line = if trimmed.starts_with('#') {
        trimmed.trim_start_matches('#').trim()
    } else {
        line
    };
    let line = link_pattern().replace_all(line, "$1");
    let line = line.replace('`', "");
    emphasis_pattern().replace_all(&line, "$1$2").into_owned()
}
