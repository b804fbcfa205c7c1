use super::{read_appended, TailEvent};
use crate::cursors::CursorStore;
use crate::sanitize::sanitize;
use crate::sources::ActiveJsonl;
use anyhow::Result;
use serde_json::Value;

/// Tail one JSONL history file and decode the appended records.
///
/// Records are duck-typed maps; schemas differ per tool, so the session id
/// and text are found by probing the source's ordered key lists. Malformed
/// lines are skipped, never fatal.
pub fn poll(source: &ActiveJsonl, cursors: &mut CursorStore) -> Result<Vec<TailEvent>> {
    let key = CursorStore::key("jsonl", source.name, &source.path);
    let Some(chunk) = read_appended(&source.path, cursors, &key)? else {
        return Ok(Vec::new());
    };

    let mut events = Vec::new();
    for line in chunk.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };

        let text = sanitize(&extract_text(&record, source.text_keys));
        if text.is_empty() {
            continue;
        }
        events.push(TailEvent {
            sid: extract_sid(&record, source.sid_keys, source.name),
            text,
        });
    }
    Ok(events)
}

/// Probe the ordered sid keys for a non-empty scalar; fall back to a
/// per-source default bucket.
fn extract_sid(record: &Value, sid_keys: &[&str], source_name: &str) -> String {
    for key in sid_keys {
        match record.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return s.clone(),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => return n.to_string(),
            _ => {}
        }
    }
    format!("{source_name}_default")
}

/// Probe the ordered text keys for a non-empty string. Failing that, join
/// the `parts` array's text-typed elements. A top-level `input` doubles as
/// the standalone prompt field for some tools and as the prefix of a
/// `parts` record, so when both are present it prefixes the joined parts
/// rather than shadowing them.
fn extract_text(record: &Value, text_keys: &[&str]) -> String {
    let parts = parts_text(record);

    for key in text_keys {
        if let Some(Value::String(s)) = record.get(*key) {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                continue;
            }
            if *key == "input" {
                if let Some(joined) = &parts {
                    return format!("{trimmed}\n{joined}");
                }
            }
            return trimmed.to_string();
        }
    }

    let Some(joined) = parts else {
        return String::new();
    };
    match record.get("input").and_then(Value::as_str).map(str::trim) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}\n{joined}"),
        _ => joined,
    }
}

/// Joined text-typed elements of a `parts` array, if any.
fn parts_text(record: &Value) -> Option<String> {
    let Some(Value::Array(parts)) = record.get("parts") else {
        return None;
    };
    let texts: Vec<&str> = parts
        .iter()
        .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}
