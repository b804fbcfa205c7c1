use crate::cursors::CursorStore;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// How often `refresh` re-scans candidate paths, at most.
const REFRESH_INTERVAL_SEC: i64 = 120;

const CLAUDE_SID_KEYS: &[&str] = &["sessionId", "session_id"];
const CLAUDE_TEXT_KEYS: &[&str] = &["display", "text", "input", "prompt"];
const CODEX_SID_KEYS: &[&str] = &["session_id", "sessionId", "id"];
const CODEX_TEXT_KEYS: &[&str] = &["text", "input", "prompt"];
const PROMPT_SID_KEYS: &[&str] = &["session_id", "sessionId", "id"];
const PROMPT_TEXT_KEYS: &[&str] = &["input", "prompt", "text"];

/// A logical JSONL history source: ordered candidate paths plus the ordered
/// field names used to probe each record for a session id and a text body.
pub struct JsonlSource {
    pub name: &'static str,
    pub sid_keys: &'static [&'static str],
    pub text_keys: &'static [&'static str],
    pub candidates: Vec<PathBuf>,
}

pub struct ShellSource {
    pub name: &'static str,
    pub candidates: Vec<PathBuf>,
}

/// Snapshot of one active JSONL source, handed to the tailer.
#[derive(Clone)]
pub struct ActiveJsonl {
    pub name: &'static str,
    pub sid_keys: &'static [&'static str],
    pub text_keys: &'static [&'static str],
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct ActiveShell {
    pub name: &'static str,
    pub path: PathBuf,
}

fn jsonl_sources(home: &Path) -> Vec<JsonlSource> {
    vec![
        JsonlSource {
            name: "claude_code",
            sid_keys: CLAUDE_SID_KEYS,
            text_keys: CLAUDE_TEXT_KEYS,
            candidates: vec![home.join(".claude").join("history.jsonl")],
        },
        JsonlSource {
            name: "codex_history",
            sid_keys: CODEX_SID_KEYS,
            text_keys: CODEX_TEXT_KEYS,
            candidates: vec![home.join(".codex").join("history.jsonl")],
        },
        JsonlSource {
            name: "opencode",
            sid_keys: PROMPT_SID_KEYS,
            text_keys: PROMPT_TEXT_KEYS,
            candidates: vec![
                home.join(".local").join("state").join("opencode").join("prompt-history.jsonl"),
                home.join(".config").join("opencode").join("prompt-history.jsonl"),
                home.join(".opencode").join("prompt-history.jsonl"),
            ],
        },
        JsonlSource {
            name: "kilo",
            sid_keys: PROMPT_SID_KEYS,
            text_keys: PROMPT_TEXT_KEYS,
            candidates: vec![
                home.join(".local").join("state").join("kilo").join("prompt-history.jsonl"),
                home.join(".config").join("kilo").join("prompt-history.jsonl"),
            ],
        },
    ]
}

fn shell_sources(home: &Path) -> Vec<ShellSource> {
    vec![
        ShellSource {
            name: "shell_zsh",
            candidates: vec![home.join(".zsh_history")],
        },
        ShellSource {
            name: "shell_bash",
            candidates: vec![home.join(".bash_history")],
        },
    ]
}

/// Tracks which candidate path, if any, is live for every logical source.
///
/// Activation and rebinding seed the file cursor at the current size so a
/// newly discovered file never replays its history. A source going absent
/// keeps its cursor until bulk eviction, so a quick reappearance of the same
/// path resumes where it left off.
pub struct SourceRegistry {
    jsonl: Vec<JsonlSource>,
    shell: Vec<ShellSource>,
    shell_enabled: bool,
    jsonl_active: HashMap<&'static str, PathBuf>,
    shell_active: HashMap<&'static str, PathBuf>,
    last_refresh: Option<i64>,
}

impl SourceRegistry {
    pub fn new(home: &Path, shell_enabled: bool) -> Self {
        SourceRegistry {
            jsonl: jsonl_sources(home),
            shell: shell_sources(home),
            shell_enabled,
            jsonl_active: HashMap::new(),
            shell_active: HashMap::new(),
            last_refresh: None,
        }
    }

    /// Re-scan candidates; rate-limited unless forced.
    pub fn refresh(&mut self, cursors: &mut CursorStore, now: i64, force: bool) {
        if !force {
            if let Some(last) = self.last_refresh {
                if now - last < REFRESH_INTERVAL_SEC {
                    return;
                }
            }
        }
        self.last_refresh = Some(now);

        for source in &self.jsonl {
            let picked = source.candidates.iter().find(|p| p.exists());
            match picked {
                Some(path) => {
                    let changed = self.jsonl_active.get(source.name) != Some(path);
                    if changed {
                        seed_cursor(cursors, "jsonl", source.name, path);
                        info!("source active: {} -> {}", source.name, path.display());
                    }
                    self.jsonl_active.insert(source.name, path.clone());
                }
                None => {
                    if self.jsonl_active.remove(source.name).is_some() {
                        info!("source offline: {}", source.name);
                    }
                }
            }
        }

        if !self.shell_enabled {
            return;
        }
        for source in &self.shell {
            let picked = source.candidates.iter().find(|p| p.exists());
            match picked {
                Some(path) => {
                    let changed = self.shell_active.get(source.name) != Some(path);
                    if changed {
                        seed_cursor(cursors, "shell", source.name, path);
                        info!("source active: {} -> {}", source.name, path.display());
                    }
                    self.shell_active.insert(source.name, path.clone());
                }
                None => {
                    if self.shell_active.remove(source.name).is_some() {
                        info!("source offline: {}", source.name);
                    }
                }
            }
        }
    }

    pub fn active_jsonl(&self) -> Vec<ActiveJsonl> {
        self.jsonl
            .iter()
            .filter_map(|s| {
                let path = self.jsonl_active.get(s.name)?;
                Some(ActiveJsonl {
                    name: s.name,
                    sid_keys: s.sid_keys,
                    text_keys: s.text_keys,
                    path: path.clone(),
                })
            })
            .collect()
    }

    pub fn active_shell(&self) -> Vec<ActiveShell> {
        self.shell
            .iter()
            .filter_map(|s| {
                let path = self.shell_active.get(s.name)?;
                Some(ActiveShell {
                    name: s.name,
                    path: path.clone(),
                })
            })
            .collect()
    }

    /// Names of every currently active source, for the heartbeat line.
    pub fn active_names(&self) -> Vec<&'static str> {
        self.active_jsonl()
            .iter()
            .map(|s| s.name)
            .chain(self.active_shell().iter().map(|s| s.name))
            .collect()
    }
}

/// Start-of-stream skip: a source becoming active begins at end-of-file.
fn seed_cursor(cursors: &mut CursorStore, kind: &str, source: &str, path: &Path) {
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let key = CursorStore::key(kind, source, path);
    cursors.set(&key, size);
}
