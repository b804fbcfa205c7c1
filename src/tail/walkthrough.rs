use crate::sanitize::sanitize;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::error;

/// Cap on how much of a walkthrough file is harvested.
const MAX_WALKTHROUGH_BYTES: u64 = 50_000;

pub const SOURCE_NAME: &str = "antigravity";
pub const TITLE_PREFIX: &str = "Antigravity Walkthrough";

/// Per-directory baseline. A directory's first sighting only records the
/// file's mtime; emitting on first sight would replay every historical
/// walkthrough after a daemon restart.
pub struct SeenWalkthrough {
    pub path: PathBuf,
    pub mtime: SystemTime,
}

/// A walkthrough ready to export. These bypass the session tracker: the
/// file is already a complete session-shaped document.
pub struct WalkthroughExport {
    pub sid: String,
    pub content: String,
}

#[derive(Default)]
pub struct WalkthroughBatch {
    pub exports: Vec<WalkthroughExport>,
    pub errors: u32,
}

/// Scan the immediate UUID-ish subdirectories of `root` for updated
/// `walkthrough.md` files.
pub fn poll(root: &Path, seen: &mut HashMap<String, SeenWalkthrough>) -> WalkthroughBatch {
    let mut batch = WalkthroughBatch::default();
    if !root.is_dir() {
        return batch;
    }
    let Ok(entries) = std::fs::read_dir(root) else {
        return batch;
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let sid = entry.file_name().to_string_lossy().into_owned();
        if !looks_like_session_dir(&sid) || !entry.path().is_dir() {
            continue;
        }
        let file = entry.path().join("walkthrough.md");
        let Ok(mtime) = std::fs::metadata(&file).and_then(|m| m.modified()) else {
            continue;
        };

        let updated = match seen.get(&sid) {
            Some(prev) => mtime > prev.mtime,
            None => {
                seen.insert(sid, SeenWalkthrough { path: file, mtime });
                continue;
            }
        };
        if !updated {
            continue;
        }

        match read_capped(&file) {
            Ok(raw) => {
                let content = sanitize(&raw);
                if !content.is_empty() {
                    batch.exports.push(WalkthroughExport {
                        sid: sid.clone(),
                        content,
                    });
                    seen.insert(sid, SeenWalkthrough { path: file, mtime });
                }
            }
            Err(err) => {
                batch.errors += 1;
                error!("walkthrough {sid}: {err:#}");
            }
        }
    }
    batch
}

/// UUID-ish directory names: at least five dash-separated segments.
fn looks_like_session_dir(name: &str) -> bool {
    name.matches('-').count() >= 4
}

fn read_capped(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut buf = Vec::new();
    file.take(MAX_WALKTHROUGH_BYTES)
        .read_to_end(&mut buf)
        .with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
