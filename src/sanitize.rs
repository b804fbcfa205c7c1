use regex::Regex;
use std::sync::OnceLock;

/// Hard bound on any single harvested text.
pub const MAX_TEXT_LEN: usize = 4000;

/// Ordered redaction rules. Applied top to bottom; a starred value never
/// re-expands, so the whole pass is idempotent.
fn rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r#"(?i)(api[_-]?key\s*[=:]\s*)([^\s"']+)"#, "${1}***"),
            (r#"(?i)(token\s*[=:]\s*)([^\s"']+)"#, "${1}***"),
            (r#"(?i)(password\s*[=:]\s*)([^\s"']+)"#, "${1}***"),
            (r"(?i)(--api-key\s+)(\S+)", "${1}***"),
            (r"(?i)(--token\s+)(\S+)", "${1}***"),
            (r"\b(sk-[A-Za-z0-9_-]{16,})\b", "sk-***"),
        ]
        .iter()
        .map(|(pat, repl)| (Regex::new(pat).expect("redaction pattern"), *repl))
        .collect()
    })
}

/// Strip, redact secrets, bound length. Never fails; may return an empty
/// string, in which case the caller drops the event.
pub fn sanitize(text: &str) -> String {
    let mut out = text.trim().to_string();
    if out.is_empty() {
        return out;
    }
    for (pattern, repl) in rules() {
        if let std::borrow::Cow::Owned(replaced) = pattern.replace_all(&out, *repl) {
            out = replaced;
        }
    }
    truncate_chars(&mut out, MAX_TEXT_LEN);
    out
}

/// Truncate in place to at most `max` characters, on a char boundary.
pub fn truncate_chars(s: &mut String, max: usize) {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
}

/// First `max` characters of `s`, boundary-safe.
pub fn char_prefix(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
