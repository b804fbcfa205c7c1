use super::{read_appended, TailEvent};
use crate::cursors::CursorStore;
use crate::sanitize::sanitize;
use crate::sources::ActiveShell;
use anyhow::Result;
use chrono::{Local, TimeZone};
use regex::Regex;
use std::sync::OnceLock;

/// zsh extended-history prefix: `: <unix-ts>:<elapsed>;<command>`.
fn extended_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^:\s*(\d+):\d+;(.*)$").expect("shell line pattern"))
}

/// History-navigation commands that say nothing about what the user did.
const IGNORE_PREFIXES: &[&str] = &["history", "fc "];

/// Tail one shell history file. Commands issued the same calendar day share
/// one session, so the id is `<source>_<YYYYMMDD>` from the command's own
/// timestamp when the extended prefix carries one, else from `now`.
pub fn poll(source: &ActiveShell, cursors: &mut CursorStore, now: i64) -> Result<Vec<TailEvent>> {
    let key = CursorStore::key("shell", source.name, &source.path);
    let Some(chunk) = read_appended(&source.path, cursors, &key)? else {
        return Ok(Vec::new());
    };

    let mut events = Vec::new();
    for line in chunk.lines() {
        if let Some((sid, text)) = parse_line(source.name, line, now) {
            events.push(TailEvent { sid, text });
        }
    }
    Ok(events)
}

fn parse_line(source_name: &str, raw_line: &str, now: i64) -> Option<(String, String)> {
    let line = raw_line.trim();
    if line.is_empty() {
        return None;
    }

    let (ts, cmd) = match extended_line_re().captures(line) {
        Some(caps) => {
            let ts = caps[1].parse::<i64>().unwrap_or(now);
            (ts, caps[2].trim().to_string())
        }
        None => (now, line.to_string()),
    };
    if cmd.is_empty() {
        return None;
    }

    let lowered = cmd.to_lowercase();
    if IGNORE_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        return None;
    }

    let cmd = sanitize(&cmd);
    if cmd.is_empty() {
        return None;
    }

    Some((format!("{source_name}_{}", day_stamp(ts)), cmd))
}

/// Local-time `YYYYMMDD` for a unix timestamp.
fn day_stamp(ts: i64) -> String {
    Local
        .timestamp_opt(ts, 0)
        .single()
        .unwrap_or_else(Local::now)
        .format("%Y%m%d")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn extended_prefix_supplies_timestamp_and_command() {
        let (sid, text) = parse_line("shell_zsh", ": 1700000000:0;ls -la", 0).unwrap();
        assert_eq!(sid, format!("shell_zsh_{}", day_stamp(1700000000)));
        assert_eq!(text, "ls -la");
    }

    #[test]
    fn plain_lines_use_now_for_the_day_bucket() {
        let now = 1700000000;
        let (sid, text) = parse_line("shell_bash", "make test", now).unwrap();
        assert_eq!(sid, format!("shell_bash_{}", day_stamp(now)));
        assert_eq!(text, "make test");
    }

    #[test]
    fn same_day_commands_share_a_session() {
        let (sid_a, _) = parse_line("shell_zsh", ": 1700000000:0;ls", 0).unwrap();
        let (sid_b, _) = parse_line("shell_zsh", ": 1700000900:5;pwd", 0).unwrap();
        assert_eq!(sid_a, sid_b);
    }

    #[test]
    fn history_navigation_is_ignored() {
        assert!(parse_line("shell_zsh", "history", 0).is_none());
        assert!(parse_line("shell_zsh", "history 20", 0).is_none());
        assert!(parse_line("shell_zsh", "HISTORY | grep x", 0).is_none());
        assert!(parse_line("shell_zsh", "fc -l", 0).is_none());
        assert!(parse_line("shell_zsh", ": 1700000000:0;history", 0).is_none());
        // "fc" needs its trailing space; fcsomething is a real command.
        assert!(parse_line("shell_zsh", "fchmod +x f", 0).is_some());
    }

    #[test]
    fn blank_and_empty_commands_are_dropped() {
        assert!(parse_line("shell_zsh", "", 0).is_none());
        assert!(parse_line("shell_zsh", "   ", 0).is_none());
        assert!(parse_line("shell_zsh", ": 1700000000:0;", 0).is_none());
    }

    #[test]
    fn commands_are_sanitized() {
        let (_, text) = parse_line("shell_zsh", "curl --token abc123 https://x", 0).unwrap();
        assert_eq!(text, "curl --token *** https://x");
    }

    #[test]
    fn poll_reads_only_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".zsh_history");
        fs::write(&path, ": 1700000000:0;old\n").unwrap();

        let source = ActiveShell {
            name: "shell_zsh",
            path: path.clone(),
        };
        let mut cursors = CursorStore::new();
        let key = CursorStore::key("shell", "shell_zsh", &path);
        cursors.set(&key, fs::metadata(&path).unwrap().len());

        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str(": 1700000001:0;pwd\n: 1700000002:0;echo hi\n");
        fs::write(&path, &content).unwrap();

        let events = poll(&source, &mut cursors, 1700000010).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].text, "pwd");
        assert_eq!(events[1].text, "echo hi");
    }
}
