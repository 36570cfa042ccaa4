use super::{CappedText, ExtractionError, plain};
use std::path::Path;

const SAMPLE_CHARS: usize = 1024;
const CANDIDATE_DELIMITERS: [char; 4] = [',', '\t', ';', '|'];

/// Render CSV as a `Headers:` line followed by numbered `Row N:` lines.
///
/// Fields are parsed with the sniffed delimiter and re-joined with `", "`. Blank lines are
/// skipped and do not consume a row number.
pub(crate) fn extract(path: &Path, max_chars: usize) -> Result<Option<String>, ExtractionError> {
    let content = plain::read_text(path)?;
    let sample: String = content.chars().take(SAMPLE_CHARS).collect();
    let delimiter = sniff_delimiter(&sample, content.chars().count() > SAMPLE_CHARS);

    let mut text = CappedText::new(max_chars);
    for (index, row) in Records::new(&content, delimiter).enumerate() {
        let joined = row.join(", ");
        let line = if index == 0 {
            format!("Headers: {joined}")
        } else {
            format!("Row {index}: {joined}")
        };
        if !text.push(&line) {
            break;
        }
    }
    Ok(text.finish())
}

/// Pick the delimiter from a leading sample of CSV content.
///
/// A candidate wins when it appears, outside quotes, the same non-zero number of times on
/// every complete non-blank line; candidates are tried in the order `,` `\t` `;` `|`. When no
/// candidate is consistent the one with the most occurrences on the first line is used, and
/// `,` when nothing matches at all. `truncated` drops the trailing partial line of the sample.
pub fn sniff_delimiter(sample: &str, truncated: bool) -> char {
    let mut lines: Vec<&str> = sample.lines().collect();
    if truncated && lines.len() > 1 {
        lines.pop();
    }
    lines.retain(|line| !line.trim().is_empty());
    let Some(first) = lines.first() else {
        return ',';
    };

    let consistent = CANDIDATE_DELIMITERS.iter().copied().find(|candidate| {
        let expected = count_unquoted(first, *candidate);
        expected > 0
            && lines
                .iter()
                .all(|line| count_unquoted(line, *candidate) == expected)
    });
    if let Some(delimiter) = consistent {
        return delimiter;
    }

    CANDIDATE_DELIMITERS
        .iter()
        .copied()
        .map(|candidate| (candidate, count_unquoted(first, candidate)))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
        .map_or(',', |(candidate, _)| candidate)
}

fn count_unquoted(line: &str, delimiter: char) -> usize {
    let mut quoted = false;
    line.chars()
        .filter(|c| {
            if *c == '"' {
                quoted = !quoted;
            }
            !quoted && *c == delimiter
        })
        .count()
}

/// Quote-aware record iterator: `""` escapes a quote inside a quoted field, and quoted fields
/// may span lines.
struct Records<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    delimiter: char,
}

impl<'a> Records<'a> {
    fn new(content: &'a str, delimiter: char) -> Self {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        Self {
            chars: content.chars().peekable(),
            delimiter,
        }
    }

    fn next_record(&mut self) -> Option<Vec<String>> {
        self.chars.peek()?;
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut quoted = false;

        while let Some(c) = self.chars.next() {
            if quoted {
                match c {
                    '"' if self.chars.peek() == Some(&'"') => {
                        self.chars.next();
                        field.push('"');
                    }
                    '"' => quoted = false,
                    _ => field.push(c),
                }
                continue;
            }
            match c {
                '"' => quoted = true,
                '\r' if self.chars.peek() == Some(&'\n') => {}
                '\n' | '\r' => {
                    fields.push(field);
                    return Some(fields);
                }
                c if c == self.delimiter => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
        fields.push(field);
        Some(fields)
    }
}

impl Iterator for Records<'_> {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = self.next_record()?;
            let blank = record.len() == 1 && record[0].trim().is_empty();
            if !blank {
                return Some(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn extract_str(content: &str, cap: usize) -> Option<String> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, content).unwrap();
        extract(&path, cap).unwrap()
    }

    fn rows(content: &str, delimiter: char) -> Vec<Vec<String>> {
        Records::new(content, delimiter).collect()
    }

    #[test]
    fn renders_headers_and_rows() {
        assert_eq!(
            extract_str("a,b\n1,2\n3,4", 1000).as_deref(),
            Some("Headers: a, b\nRow 1: 1, 2\nRow 2: 3, 4")
        );
    }

    #[test]
    fn uses_sniffed_delimiter() {
        assert_eq!(
            extract_str("name;city\nAda;London\n", 1000).as_deref(),
            Some("Headers: name, city\nRow 1: Ada, London")
        );
    }

    #[test]
    fn sniffs_common_delimiters() {
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3", false), ',');
        assert_eq!(sniff_delimiter("a\tb\n1\t2", false), '\t');
        assert_eq!(sniff_delimiter("a|b|c\n1|2|3", false), '|');
        assert_eq!(sniff_delimiter("\"x,y\";z\n\"1,2\";3", false), ';');
        assert_eq!(sniff_delimiter("single", false), ',');
        assert_eq!(sniff_delimiter("", false), ',');
    }

    #[test]
    fn parses_quoted_fields() {
        assert_eq!(
            rows("\"a, b\",c\n\"say \"\"hi\"\"\",d\r\n", ','),
            vec![
                vec!["a, b".to_string(), "c".to_string()],
                vec!["say \"hi\"".to_string(), "d".to_string()],
            ]
        );
    }

    #[test]
    fn quoted_fields_may_span_lines() {
        assert_eq!(
            rows("note,id\n\"line one\nline two\",7\n", ','),
            vec![
                vec!["note".to_string(), "id".to_string()],
                vec!["line one\nline two".to_string(), "7".to_string()],
            ]
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(
            extract_str("a,b\n\n1,2\n\n", 1000).as_deref(),
            Some("Headers: a, b\nRow 1: 1, 2")
        );
    }

    #[test]
    fn cap_cuts_mid_accumulation() {
        let text = extract_str("a,b\n1,2\n3,4", 20).unwrap();
        assert_eq!(text, "Headers: a, b\nRow 1:");
        assert_eq!(text.chars().count(), 20);
    }
}
