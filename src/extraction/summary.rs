/// Produce a short summary of extracted text.
///
/// Text at or under `max_chars` characters is returned unchanged. Longer text is cut to
/// `max_chars`; if the cut contains a period past 70% of the limit the summary ends right after
/// it, otherwise `...` is appended.
pub fn summarize_text(text: &str, max_chars: usize) -> String {
    if text.is_empty() {
        return String::new();
    }
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };

    let truncated = &text[..cut];
    let threshold = max_chars as f64 * 0.7;
    match truncated.rfind('.') {
        Some(period) if truncated[..period].chars().count() as f64 > threshold => {
            truncated[..=period].to_string()
        }
        _ => format!("{truncated}..."),
    }
}
