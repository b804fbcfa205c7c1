use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration, resolved once at startup from the environment.
///
/// Every knob is optional; defaults match a quiet background daemon. The
/// lookup is injectable so floors, defaults, and alias precedence are
/// testable without mutating the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote index, e.g. `http://127.0.0.1:8090/api/v1`.
    pub base_url: String,
    /// Root under which artifacts and the outbox live.
    pub storage_root: PathBuf,
    /// Home directory all source candidate paths hang off.
    pub home: PathBuf,
    /// Directory for the rotating daemon log.
    pub log_dir: PathBuf,
    /// Root of the codex session tree (`**/*.jsonl`).
    pub codex_sessions: PathBuf,
    /// Root of the antigravity walkthrough directories.
    pub antigravity_brain: PathBuf,

    pub shell_monitor: bool,
    pub idle_timeout_sec: i64,
    pub poll_interval_sec: i64,
    pub fast_poll_interval_sec: i64,
    pub pending_retry_interval_sec: i64,
    pub heartbeat_interval_sec: i64,
    pub max_tracked_sessions: usize,
    pub max_file_cursors: usize,
    pub session_ttl_sec: i64,
    pub max_messages_per_session: usize,
    pub export_http_timeout: Duration,
    pub pending_http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::resolve(|key| std::env::var(key).ok())
    }

    pub fn resolve<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME")
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        let base_url = lookup("OPENVIKING_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "http://127.0.0.1:8090/api/v1".to_string());

        // Canonical var wins; the legacy alias is still accepted.
        let storage_root = lookup("UNIFIED_CONTEXT_STORAGE_ROOT")
            .or_else(|| lookup("OPENVIKING_STORAGE_ROOT"))
            .map(|raw| expand_tilde(&raw, &home))
            .unwrap_or_else(|| home.join(".unified_context_data"));

        let shell_monitor = lookup("VIKING_ENABLE_SHELL_MONITOR")
            .map(|v| v == "1")
            .unwrap_or(true);

        Config {
            base_url,
            storage_root,
            log_dir: home.join(".context_system").join("logs"),
            codex_sessions: home.join(".codex").join("sessions"),
            antigravity_brain: home.join(".gemini").join("antigravity").join("brain"),
            shell_monitor,
            idle_timeout_sec: int(&lookup, "VIKING_IDLE_TIMEOUT_SEC", 300, 1),
            poll_interval_sec: int(&lookup, "VIKING_POLL_INTERVAL_SEC", 30, 1),
            fast_poll_interval_sec: int(&lookup, "VIKING_FAST_POLL_INTERVAL_SEC", 3, 1),
            pending_retry_interval_sec: int(&lookup, "VIKING_PENDING_RETRY_INTERVAL_SEC", 60, 5),
            heartbeat_interval_sec: int(&lookup, "VIKING_HEARTBEAT_INTERVAL_SEC", 600, 1),
            max_tracked_sessions: int(&lookup, "VIKING_MAX_TRACKED_SESSIONS", 240, 1) as usize,
            max_file_cursors: int(&lookup, "VIKING_MAX_FILE_CURSORS", 800, 1) as usize,
            session_ttl_sec: int(&lookup, "VIKING_SESSION_TTL_SEC", 7200, 1),
            max_messages_per_session: int(&lookup, "VIKING_MAX_MESSAGES_PER_SESSION", 500, 1)
                as usize,
            export_http_timeout: Duration::from_secs(
                int(&lookup, "VIKING_EXPORT_HTTP_TIMEOUT_SEC", 30, 5) as u64,
            ),
            pending_http_timeout: Duration::from_secs(
                int(&lookup, "VIKING_PENDING_HTTP_TIMEOUT_SEC", 15, 5) as u64,
            ),
            home,
        }
    }

    /// Directory completed artifacts are written to.
    pub fn history_dir(&self) -> PathBuf {
        self.storage_root
            .join("resources")
            .join("shared")
            .join("history")
    }

    /// Outbox for artifacts whose remote POST has not yet succeeded.
    pub fn pending_dir(&self) -> PathBuf {
        self.history_dir().join(".pending")
    }

    /// Reject a remote URL that would send session content over plain HTTP
    /// to a non-loopback host. Fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| anyhow!("invalid OPENVIKING_URL `{}`: {e}", self.base_url))?;
        match url.scheme() {
            "https" => Ok(()),
            "http" => {
                let host = url.host_str().unwrap_or("");
                if is_loopback_host(host) {
                    Ok(())
                } else {
                    Err(anyhow!(
                        "OPENVIKING_URL `{}` uses plain http with non-loopback host `{host}`; use https",
                        self.base_url
                    ))
                }
            }
            other => Err(anyhow!(
                "OPENVIKING_URL `{}` has unsupported scheme `{other}`",
                self.base_url
            )),
        }
    }
}

fn int<F>(lookup: &F, key: &str, default: i64, floor: i64) -> i64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
        .max(floor)
}

fn expand_tilde(raw: &str, home: &Path) -> PathBuf {
    if raw == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::resolve(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let cfg = resolve(&[("HOME", "/home/u")]);
        assert_eq!(cfg.base_url, "http://127.0.0.1:8090/api/v1");
        assert_eq!(cfg.storage_root, PathBuf::from("/home/u/.unified_context_data"));
        assert_eq!(cfg.idle_timeout_sec, 300);
        assert_eq!(cfg.poll_interval_sec, 30);
        assert_eq!(cfg.fast_poll_interval_sec, 3);
        assert_eq!(cfg.pending_retry_interval_sec, 60);
        assert_eq!(cfg.max_tracked_sessions, 240);
        assert_eq!(cfg.max_file_cursors, 800);
        assert_eq!(cfg.max_messages_per_session, 500);
        assert!(cfg.shell_monitor);
        assert_eq!(cfg.export_http_timeout, Duration::from_secs(30));
        assert_eq!(cfg.pending_http_timeout, Duration::from_secs(15));
    }

    #[test]
    fn floors_clamp_small_values() {
        let cfg = resolve(&[
            ("HOME", "/home/u"),
            ("VIKING_FAST_POLL_INTERVAL_SEC", "0"),
            ("VIKING_PENDING_RETRY_INTERVAL_SEC", "1"),
            ("VIKING_EXPORT_HTTP_TIMEOUT_SEC", "2"),
            ("VIKING_PENDING_HTTP_TIMEOUT_SEC", "0"),
        ]);
        assert_eq!(cfg.fast_poll_interval_sec, 1);
        assert_eq!(cfg.pending_retry_interval_sec, 5);
        assert_eq!(cfg.export_http_timeout, Duration::from_secs(5));
        assert_eq!(cfg.pending_http_timeout, Duration::from_secs(5));
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let cfg = resolve(&[("HOME", "/home/u"), ("VIKING_POLL_INTERVAL_SEC", "soon")]);
        assert_eq!(cfg.poll_interval_sec, 30);
    }

    #[test]
    fn canonical_storage_root_wins_over_legacy_alias() {
        let cfg = resolve(&[
            ("HOME", "/home/u"),
            ("UNIFIED_CONTEXT_STORAGE_ROOT", "/data/ctx"),
            ("OPENVIKING_STORAGE_ROOT", "/data/old"),
        ]);
        assert_eq!(cfg.storage_root, PathBuf::from("/data/ctx"));

        let cfg = resolve(&[("HOME", "/home/u"), ("OPENVIKING_STORAGE_ROOT", "/data/old")]);
        assert_eq!(cfg.storage_root, PathBuf::from("/data/old"));
    }

    #[test]
    fn storage_root_expands_tilde() {
        let cfg = resolve(&[("HOME", "/home/u"), ("UNIFIED_CONTEXT_STORAGE_ROOT", "~/ctx")]);
        assert_eq!(cfg.storage_root, PathBuf::from("/home/u/ctx"));
    }

    #[test]
    fn shell_monitor_disabled_by_zero() {
        let cfg = resolve(&[("HOME", "/home/u"), ("VIKING_ENABLE_SHELL_MONITOR", "0")]);
        assert!(!cfg.shell_monitor);
    }

    #[test]
    fn derived_dirs_hang_off_storage_root() {
        let cfg = resolve(&[("HOME", "/home/u")]);
        assert_eq!(
            cfg.history_dir(),
            PathBuf::from("/home/u/.unified_context_data/resources/shared/history")
        );
        assert!(cfg.pending_dir().ends_with("history/.pending"));
    }

    #[test]
    fn validate_accepts_loopback_http() {
        for url in [
            "http://127.0.0.1:8090/api/v1",
            "http://localhost:8090/api/v1",
            "http://[::1]:8090/api/v1",
            "http://127.9.9.9/api/v1",
        ] {
            let cfg = resolve(&[("HOME", "/home/u"), ("OPENVIKING_URL", url)]);
            assert!(cfg.validate().is_ok(), "{url} should validate");
        }
    }

    #[test]
    fn validate_rejects_remote_http() {
        let cfg = resolve(&[
            ("HOME", "/home/u"),
            ("OPENVIKING_URL", "http://viking.example.com/api/v1"),
        ]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_remote_https() {
        let cfg = resolve(&[
            ("HOME", "/home/u"),
            ("OPENVIKING_URL", "https://viking.example.com/api/v1"),
        ]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_garbage_and_odd_schemes() {
        for url in ["not a url", "ftp://127.0.0.1/x"] {
            let cfg = resolve(&[("HOME", "/home/u"), ("OPENVIKING_URL", url)]);
            assert!(cfg.validate().is_err(), "{url} should be rejected");
        }
    }
}
