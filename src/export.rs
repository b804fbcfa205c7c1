use crate::config::Config;
use crate::sanitize::char_prefix;
use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// At most this many queued artifacts are retried per drain.
const RETRY_BATCH: usize = 8;
/// Messages included in an artifact body, from the end.
const BODY_MESSAGES: usize = 60;
/// Per-message cap inside the body.
const BODY_MESSAGE_CHARS: usize = 2000;
/// Session-id prefix used in titles and filenames.
const SID_PREFIX_CHARS: usize = 12;

const TARGET: &str = "viking://resources/shared/history";

#[derive(Serialize)]
struct ResourcePayload {
    path: String,
    target: &'static str,
    reason: String,
    instruction: String,
}

/// Writes completed sessions as local Markdown artifacts and asks the
/// remote index to ingest them. A failed POST copies the artifact into the
/// pending outbox; the artifact itself always stays where it was written.
pub struct Exporter {
    client: Option<reqwest::Client>,
    base_url: String,
    history_dir: PathBuf,
    pending_dir: PathBuf,
    export_timeout: Duration,
    pending_timeout: Duration,
    export_count: u64,
    last_pending_retry: Option<i64>,
}

impl Exporter {
    pub fn new(cfg: &Config) -> Self {
        // trust_env off: a proxy var must not reroute loopback traffic.
        let client = match reqwest::Client::builder().no_proxy().build() {
            Ok(c) => Some(c),
            Err(err) => {
                warn!("http client unavailable, running local-only: {err}");
                None
            }
        };

        let exporter = Exporter {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            history_dir: cfg.history_dir(),
            pending_dir: cfg.pending_dir(),
            export_timeout: cfg.export_http_timeout,
            pending_timeout: cfg.pending_http_timeout,
            export_count: 0,
            last_pending_retry: None,
        };
        if let Err(err) = create_private_dir(&exporter.pending_dir) {
            error!("creating pending dir: {err:#}");
        }
        exporter
    }

    pub fn export_count(&self) -> u64 {
        self.export_count
    }

    pub fn pending_count(&self) -> usize {
        pending_files(&self.pending_dir).len()
    }

    pub fn has_pending(&self) -> bool {
        !pending_files(&self.pending_dir).is_empty()
    }

    /// Write the artifact and try to index it remotely. Returns true only
    /// when the remote accepted it on this call.
    pub async fn export(
        &mut self,
        sid: &str,
        source: &str,
        messages: &[String],
        title_prefix: Option<&str>,
        now: i64,
    ) -> bool {
        let sid_short = char_prefix(sid, SID_PREFIX_CHARS);
        let prefix = title_prefix.map(str::to_string).unwrap_or_else(|| format!("Live {source} Session"));
        let title = format!("{prefix} {sid_short}");
        let formatted = compose_artifact(&title, source, messages);

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let file_name = format!("{source}_{stamp}_{sid_short}.md");
        let file_path = self.history_dir.join(&file_name);

        if let Err(err) = create_private_dir(&self.history_dir)
            .and_then(|_| write_private(&file_path, &formatted))
        {
            error!("writing artifact {}: {err:#}", file_path.display());
            return false;
        }

        if let Some(client) = self.client.clone() {
            let payload = ResourcePayload {
                path: file_path.to_string_lossy().into_owned(),
                target: TARGET,
                reason: format!("Real-time sync of {source} session"),
                instruction: format!("Index real-time completed {source} conversation: {title}"),
            };
            match self.post(&client, &payload, self.export_timeout).await {
                Ok(status) if status < 300 => {
                    self.export_count += 1;
                    info!("synced {source} session {sid_short}");
                    self.retry_pending(now).await;
                    return true;
                }
                Ok(status) => warn!("index returned HTTP {status} for {source} {sid_short}"),
                Err(err) => warn!("index unreachable, queueing: {err}"),
            }
        }

        match write_private(&self.pending_dir.join(&file_name), &formatted) {
            Ok(()) => info!("queued pending sync: {file_name}"),
            Err(err) => error!("writing pending copy: {err:#}"),
        }
        false
    }

    /// Drain the outbox if the retry interval has elapsed and there is
    /// anything in it.
    pub async fn maybe_retry_pending(&mut self, now: i64, retry_interval: i64) {
        if !self.has_pending() {
            return;
        }
        if let Some(last) = self.last_pending_retry {
            if now - last < retry_interval {
                return;
            }
        }
        self.retry_pending(now).await;
    }

    /// Re-POST up to `RETRY_BATCH` queued artifacts, oldest first. A file is
    /// deleted only once the remote accepts it; the first failure ends the
    /// batch so a down service is not hammered.
    async fn retry_pending(&mut self, now: i64) {
        let Some(client) = self.client.clone() else {
            return;
        };
        let pending = pending_files(&self.pending_dir);
        if pending.is_empty() {
            return;
        }
        self.last_pending_retry = Some(now);

        for path in pending.into_iter().take(RETRY_BATCH) {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let payload = ResourcePayload {
                path: path.to_string_lossy().into_owned(),
                target: TARGET,
                reason: "Retry pending sync".to_string(),
                instruction: format!("Index pending conversation: {stem}"),
            };
            match self.post(&client, &payload, self.pending_timeout).await {
                Ok(status) if status < 300 => {
                    if let Err(err) = fs::remove_file(&path) {
                        warn!("removing retried pending file: {err}");
                    }
                    info!("retried pending ok: {stem}");
                }
                _ => break,
            }
        }
    }

    async fn post(
        &self,
        client: &reqwest::Client,
        payload: &ResourcePayload,
        timeout: Duration,
    ) -> Result<u16> {
        let resp = client
            .post(format!("{}/resources", self.base_url))
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .context("posting resource")?;
        Ok(resp.status().as_u16())
    }
}

/// Compose the human-readable artifact: title, tags, date, bulleted body of
/// the most recent messages.
fn compose_artifact(title: &str, source: &str, messages: &[String]) -> String {
    let start = messages.len().saturating_sub(BODY_MESSAGES);
    let body = messages[start..]
        .iter()
        .map(|m| char_prefix(m, BODY_MESSAGE_CHARS))
        .collect::<Vec<_>>()
        .join("\n- ");

    format!(
        "# {title}\n\nTags: {source}, live_sync, unified_context\nDate: {}\n\n## Content\n- {body}\n",
        Local::now().to_rfc3339()
    )
}

/// `*.md` files in the outbox, sorted by modification time ascending.
fn pending_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path().extension().and_then(|x| x.to_str()) == Some("md")
                && e.file_type().map(|t| t.is_file()).unwrap_or(false)
        })
        .filter_map(|e| {
            let mtime = e.metadata().ok()?.modified().ok()?;
            Some((e.path(), mtime))
        })
        .collect();
    files.sort_by_key(|(_, mtime)| *mtime);
    files.into_iter().map(|(p, _)| p).collect()
}

fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("mkdir {}", dir.display()))?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("chmod {}", dir.display()))?;
    Ok(())
}

/// Owner-only create-or-truncate write. Never renamed afterwards.
fn write_private(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
