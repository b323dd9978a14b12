//! Utility functions shared by the Numera crates.

use once_cell::sync::Lazy;
use regex::Regex;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries, so Cyrillic text and emoji are safe.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

static REDACTIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)(api[_-]?key|apikey)[=:]\s*\S{20,}", "$1=***REDACTED***"),
        (r"(?i)(token|secret|bearer)\s*[=:]?\s*[A-Za-z0-9:_\-\.]{10,}", "$1 ***REDACTED***"),
        (r"sk-[a-zA-Z0-9_\-]{20,}", "***REDACTED_API_KEY***"),
        (r"bot[0-9]{5,}:[A-Za-z0-9_\-]{20,}", "bot***REDACTED_BOT_TOKEN***"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Sanitize a string for safe logging (redact key-like substrings).
pub fn sanitize_for_log(s: &str) -> String {
    let mut result = s.to_string();
    for (re, replacement) in REDACTIONS.iter() {
        result = re.replace_all(&result, *replacement).to_string();
    }
    result
}
