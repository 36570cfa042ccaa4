//! Content-based MIME detection.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tokio::io::AsyncReadExt;

/// MIME type reported when nothing better is known.
pub const GENERIC_MIME: &str = "application/octet-stream";
/// MIME type of Word-processing documents.
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const SNIFF_BYTES: usize = 8192;
const CSV_DELIMITERS: [char; 4] = [',', '\t', ';', '|'];

/// Best-effort MIME detection for a stored file.
#[async_trait]
pub trait MimeSniffer: Send + Sync {
    /// Sniff the MIME type of the file at `path`; never fails, degrading to [`GENERIC_MIME`].
    async fn sniff(&self, path: &Path) -> String;
}

/// Sniffer that inspects the leading bytes of a file and ignores its name.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentSniffer;

#[async_trait]
impl MimeSniffer for ContentSniffer {
    async fn sniff(&self, path: &Path) -> String {
        match read_prefix(path).await {
            Ok(buffer) => sniff_bytes(&buffer, buffer.len() == SNIFF_BYTES),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "MIME sniffing failed");
                GENERIC_MIME.to_string()
            }
        }
    }
}

async fn read_prefix(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut buffer = Vec::with_capacity(SNIFF_BYTES);
    file.take(SNIFF_BYTES as u64).read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// Classify a leading sample of file content.
///
/// `truncated` signals that the sample stops before the end of the file, in which case the
/// trailing partial line is ignored by the text heuristics.
pub fn sniff_bytes(sample: &[u8], truncated: bool) -> String {
    if sample.is_empty() {
        return "text/plain".to_string();
    }
    if let Some(kind) = infer::get(sample) {
        let mime = kind.mime_type();
        if mime == "application/zip" && contains(sample, b"word/") {
            return DOCX_MIME.to_string();
        }
        return mime.to_string();
    }
    match decode_text(sample) {
        Some(text) => classify_text(&text, truncated).to_string(),
        None => GENERIC_MIME.to_string(),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn decode_text(sample: &[u8]) -> Option<String> {
    if sample.contains(&0) {
        return None;
    }
    match std::str::from_utf8(sample) {
        Ok(text) => Some(text.to_string()),
        // Sample cut in the middle of a multi-byte sequence.
        Err(err) if err.error_len().is_none() => {
            Some(String::from_utf8_lossy(&sample[..err.valid_up_to()]).into_owned())
        }
        Err(_) => {
            let control = sample
                .iter()
                .filter(|byte| byte.is_ascii_control() && !byte.is_ascii_whitespace())
                .count();
            (control * 10 < sample.len()).then(|| sample.iter().map(|&b| b as char).collect())
        }
    }
}

fn classify_text(text: &str, truncated: bool) -> &'static str {
    let mut lines: Vec<&str> = text.lines().collect();
    if truncated && lines.len() > 1 {
        lines.pop();
    }
    let lines: Vec<&str> = lines
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .collect();

    if lines.iter().any(|line| looks_like_markdown(line)) {
        return "text/markdown";
    }
    if looks_like_csv(&lines) {
        return "text/csv";
    }
    "text/plain"
}

fn markdown_link() -> &'static Regex {
    static LINK: OnceLock<Regex> = OnceLock::new();
    LINK.get_or_init(|| Regex::new(r"!?\[[^\]]+\]\([^)\s]+\)").expect("valid link regex"))
}

fn looks_like_markdown(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    ((1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' '))
        || trimmed.starts_with("```")
        || markdown_link().is_match(trimmed)
}

fn looks_like_csv(lines: &[&str]) -> bool {
    if lines.len() < 2 {
        return false;
    }
    CSV_DELIMITERS.iter().any(|delimiter| {
        let first = lines[0].matches(*delimiter).count();
        first > 0
            && lines
                .iter()
                .all(|line| line.matches(*delimiter).count() == first)
    })
}
