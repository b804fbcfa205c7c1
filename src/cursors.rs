use md5::{Digest, Md5};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

/// Per-file byte offsets, keyed by `kind:source:digest(path)`.
///
/// The path is hashed so the key stays short and cannot collide with the
/// `:`-separated prefix regardless of what the filesystem path contains.
/// Offsets live only in memory; a restart re-seeds from current file sizes.
#[derive(Default)]
pub struct CursorStore {
    offsets: HashMap<String, u64>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(kind: &str, source: &str, path: &Path) -> String {
        let digest = Md5::digest(path.to_string_lossy().as_bytes());
        let mut hex = String::with_capacity(10);
        for byte in digest.iter().take(5) {
            let _ = write!(hex, "{byte:02x}");
        }
        format!("{kind}:{source}:{hex}")
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.offsets.get(key).copied()
    }

    pub fn set(&mut self, key: &str, offset: u64) {
        self.offsets.insert(key.to_string(), offset);
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Bulk eviction once the table exceeds its cap: drop the first third of
    /// keys in lexicographic order. Coarse, but bounded and deterministic;
    /// an evicted source that is still live re-seeds at end-of-file on its
    /// next activation.
    pub fn cleanup(&mut self, max_cursors: usize) -> usize {
        if self.offsets.len() <= max_cursors {
            return 0;
        }
        let mut keys: Vec<String> = self.offsets.keys().cloned().collect();
        keys.sort();
        let remove_n = std::cmp::max(1, keys.len() / 3);
        for key in keys.iter().take(remove_n) {
            self.offsets.remove(key);
        }
        remove_n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn key_embeds_kind_source_and_short_digest() {
        let key = CursorStore::key("jsonl", "claude_code", Path::new("/home/u/.claude/history.jsonl"));
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts[0], "jsonl");
        assert_eq!(parts[1], "claude_code");
        assert_eq!(parts[2].len(), 10);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_is_stable_and_path_sensitive() {
        let a = CursorStore::key("shell", "shell_zsh", Path::new("/home/u/.zsh_history"));
        let b = CursorStore::key("shell", "shell_zsh", Path::new("/home/u/.zsh_history"));
        let c = CursorStore::key("shell", "shell_zsh", Path::new("/home/v/.zsh_history"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn get_set_roundtrip() {
        let mut store = CursorStore::new();
        let key = CursorStore::key("jsonl", "x", Path::new("/tmp/x"));
        assert_eq!(store.get(&key), None);
        store.set(&key, 42);
        assert_eq!(store.get(&key), Some(42));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn cleanup_is_a_no_op_under_cap() {
        let mut store = CursorStore::new();
        store.set("a", 1);
        store.set("b", 2);
        assert_eq!(store.cleanup(10), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn cleanup_removes_a_third_when_over_cap() {
        let mut store = CursorStore::new();
        for i in 0..90 {
            let key = CursorStore::key("codex_session", "codex_session", &PathBuf::from(format!("/s/{i}.jsonl")));
            store.set(&key, i);
        }
        let removed = store.cleanup(60);
        assert_eq!(removed, 30);
        assert_eq!(store.len(), 60);
    }

    #[test]
    fn cleanup_removes_at_least_one() {
        let mut store = CursorStore::new();
        store.set("a", 1);
        store.set("b", 2);
        assert_eq!(store.cleanup(1), 1);
        assert_eq!(store.len(), 1);
        // Lexicographically smallest key went first.
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some(2));
    }
}
