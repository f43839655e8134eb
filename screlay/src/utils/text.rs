//! Text shortening helpers.

use std::sync::OnceLock;

use regex::Regex;

fn error_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)ERROR:\s*(.+)").unwrap())
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('\u{2026}');
    out
}

/// The most readable line of tool output: the text after the first
/// `ERROR:`, else the first line that is not part of a stack trace.
pub fn readable_error_line(text: &str, max: usize) -> Option<String> {
    if let Some(caps) = error_line_regex().captures(text) {
        return Some(truncate(caps[1].trim(), max));
    }
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find(|line| {
            !line.starts_with("Traceback") && !line.starts_with("File \"") && !line.starts_with("at ")
        })
        .map(|line| truncate(line, max))
}
