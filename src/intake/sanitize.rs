//! Filename neutralization for untrusted upload names.

/// Longest sanitized name we keep, in bytes.
const MAX_FILENAME_LENGTH: usize = 255;

/// Device names that must never be used verbatim on Windows filesystems.
const RESERVED_WINDOWS_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce an untrusted filename to a flat, filesystem-safe name.
///
/// Path separators become word breaks, whitespace runs collapse to `_`, anything outside
/// `[A-Za-z0-9._-]` is dropped, and leading/trailing dots and underscores are trimmed so the
/// result can never name a parent directory or a hidden file. The final extension survives
/// untouched when it is made of safe characters. Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let spaced = name.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let trimmed = filtered.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        return None;
    }

    let mut sanitized = truncate_keeping_extension(trimmed, MAX_FILENAME_LENGTH);
    let stem = sanitized.split('.').next().unwrap_or_default();
    if RESERVED_WINDOWS_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        sanitized.insert(0, '_');
    }

    Some(sanitized)
}

/// Lower-cased extension of a sanitized name without the dot; empty when there is none.
pub fn normalized_extension(sanitized: &str) -> String {
    std::path::Path::new(sanitized)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

// Input is ASCII at this point, so byte offsets are char boundaries.
fn truncate_keeping_extension(name: &str, limit: usize) -> String {
    if name.len() <= limit {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if ext.len() + 1 < limit => {
            let keep = limit - ext.len() - 1;
            format!("{}.{}", &stem[..keep.min(stem.len())], ext)
        }
        _ => name[..limit].to_string(),
    }
}
