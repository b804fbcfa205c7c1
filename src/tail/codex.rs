use super::{read_appended, TailBatch, TailEvent};
use crate::cursors::CursorStore;
use crate::sanitize::sanitize;
use anyhow::Result;
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::error;
use walkdir::WalkDir;

/// Only session files touched this recently are worth tailing.
const ACTIVE_WINDOW: Duration = Duration::from_secs(3600);

pub const SOURCE_NAME: &str = "codex_session";

/// Tail the rollout session tree: every `*.jsonl` under `root`, at any
/// depth, modified within the last hour. Each file is one session, keyed by
/// its basename; each file gets its own cursor under the shared protocol.
pub fn poll(root: &Path, cursors: &mut CursorStore) -> TailBatch {
    let mut batch = TailBatch::default();
    if !root.is_dir() {
        return batch;
    }

    let cutoff = SystemTime::now() - ACTIVE_WINDOW;
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Ok(mtime) = meta.modified() else {
            continue;
        };
        if mtime < cutoff {
            continue;
        }

        if let Err(err) = poll_file(path, cursors, &mut batch.events) {
            batch.errors += 1;
            error!("codex session {}: {err:#}", path.display());
        }
    }
    batch
}

fn poll_file(path: &Path, cursors: &mut CursorStore, events: &mut Vec<TailEvent>) -> Result<()> {
    let key = CursorStore::key(SOURCE_NAME, SOURCE_NAME, path);
    let Some(chunk) = read_appended(path, cursors, &key)? else {
        return Ok(());
    };

    let sid = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    for line in chunk.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if record.get("type").and_then(Value::as_str) != Some("response_item") {
            continue;
        }

        let text = sanitize(&payload_text(&record));
        if text.is_empty() {
            continue;
        }
        events.push(TailEvent {
            sid: sid.clone(),
            text,
        });
    }
    Ok(())
}

/// Assistant output lives under two payload shapes: `message` (joined
/// `output_text` content items) and `reasoning` (a flat text field).
fn payload_text(record: &Value) -> String {
    let payload = &record["payload"];
    match payload.get("type").and_then(Value::as_str) {
        Some("message") => {
            let Some(content) = payload.get("content").and_then(Value::as_array) else {
                return String::new();
            };
            let texts: Vec<&str> = content
                .iter()
                .filter(|c| c.get("type").and_then(Value::as_str) == Some("output_text"))
                .filter_map(|c| c.get("text").and_then(Value::as_str))
                .filter(|t| !t.is_empty())
                .collect();
            texts.join("\n")
        }
        Some("reasoning") => payload
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;

    const MESSAGE_LINE: &str = "{\"type\":\"response_item\",\"payload\":{\"type\":\"message\",\"content\":[{\"type\":\"output_text\",\"text\":\"first\"},{\"type\":\"other\",\"text\":\"skip\"},{\"type\":\"output_text\",\"text\":\"second\"}]}}";
    const REASONING_LINE: &str =
        "{\"type\":\"response_item\",\"payload\":{\"type\":\"reasoning\",\"text\":\"thinking\"}}";

    #[test]
    fn message_payload_joins_output_text_items() {
        let rec: Value = serde_json::from_str(MESSAGE_LINE).unwrap();
        assert_eq!(payload_text(&rec), "first\nsecond");
    }

    #[test]
    fn reasoning_payload_uses_flat_text() {
        let rec: Value = serde_json::from_str(REASONING_LINE).unwrap();
        assert_eq!(payload_text(&rec), "thinking");
    }

    #[test]
    fn non_response_items_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout-1.jsonl");
        fs::write(
            &path,
            format!("{{\"type\":\"turn_context\"}}\n{MESSAGE_LINE}\n"),
        )
        .unwrap();

        let mut cursors = CursorStore::new();
        cursors.set(&CursorStore::key(SOURCE_NAME, SOURCE_NAME, &path), 0);
        let batch = poll(dir.path(), &mut cursors);
        assert_eq!(batch.errors, 0);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].sid, "rollout-1.jsonl");
        assert_eq!(batch.events[0].text, "first\nsecond");
    }

    #[test]
    fn sessions_are_keyed_by_basename_across_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2023").join("11").join("14");
        fs::create_dir_all(&nested).unwrap();
        let path = nested.join("rollout-abc.jsonl");
        fs::write(&path, format!("{REASONING_LINE}\n")).unwrap();

        let mut cursors = CursorStore::new();
        cursors.set(&CursorStore::key(SOURCE_NAME, SOURCE_NAME, &path), 0);
        let batch = poll(dir.path(), &mut cursors);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].sid, "rollout-abc.jsonl");
    }

    #[test]
    fn stale_files_are_not_tailed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout-old.jsonl");
        fs::write(&path, format!("{REASONING_LINE}\n")).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let mut cursors = CursorStore::new();
        cursors.set(&CursorStore::key(SOURCE_NAME, SOURCE_NAME, &path), 0);
        let batch = poll(dir.path(), &mut cursors);
        assert!(batch.events.is_empty());
        assert_eq!(batch.errors, 0);
    }

    #[test]
    fn first_sighting_of_a_file_skips_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout-new.jsonl");
        fs::write(&path, format!("{REASONING_LINE}\n")).unwrap();

        // No cursor seeded: the shared protocol starts at end-of-file.
        let mut cursors = CursorStore::new();
        let batch = poll(dir.path(), &mut cursors);
        assert!(batch.events.is_empty());

        // Appends from here on are picked up.
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str(MESSAGE_LINE);
        content.push('\n');
        fs::write(&path, &content).unwrap();
        let batch = poll(dir.path(), &mut cursors);
        assert_eq!(batch.events.len(), 1);
    }

    #[test]
    fn missing_root_is_quietly_empty() {
        let mut cursors = CursorStore::new();
        let batch = poll(Path::new("/nonexistent/sessions"), &mut cursors);
        assert!(batch.events.is_empty());
        assert_eq!(batch.errors, 0);
    }
}
