pub mod codex;
pub mod jsonl;
pub mod shell;
pub mod walkthrough;

use crate::cursors::CursorStore;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// One decoded message extracted from a monitored file.
pub struct TailEvent {
    pub sid: String,
    pub text: String,
}

/// Events plus the number of per-file failures encountered while producing
/// them. Failures are logged where they happen; the caller only counts.
#[derive(Default)]
pub struct TailBatch {
    pub events: Vec<TailEvent>,
    pub errors: u32,
}

/// The shared tail protocol: stat, compare against the cursor, read the
/// appended bytes, advance the cursor to the stat'd size.
///
/// A file smaller than its cursor is treated as truncated or rotated and
/// re-read from the start. An unseen file starts at end-of-file, so history
/// written before the daemon first saw it is never replayed. On any I/O
/// error the cursor is left untouched for the next pass.
pub fn read_appended(path: &Path, cursors: &mut CursorStore, key: &str) -> Result<Option<String>> {
    let cur_size = fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();

    let mut last = cursors.get(key).unwrap_or(cur_size);
    if cur_size < last {
        last = 0;
    }
    if cur_size <= last {
        cursors.set(key, cur_size);
        return Ok(None);
    }

    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    file.seek(SeekFrom::Start(last))
        .with_context(|| format!("seek {}", path.display()))?;
    let mut buf = Vec::with_capacity((cur_size - last) as usize);
    file.read_to_end(&mut buf)
        .with_context(|| format!("read {}", path.display()))?;

    cursors.set(key, cur_size);
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}
