use crate::config::Config;
use crate::cursors::CursorStore;
use crate::export::Exporter;
use crate::sched::{self, SleepInputs};
use crate::sources::SourceRegistry;
use crate::tail::{self, walkthrough::SeenWalkthrough};
use crate::tracker::SessionTracker;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info};

/// Bulk housekeeping (cursor eviction, extra outbox check) runs every Nth pass.
const HOUSEKEEPING_EVERY: u64 = 60;

/// Signal-driven shutdown: a flag checked at the loop head plus a wakeup so
/// an in-progress sleep ends early. The in-flight pass always completes.
pub struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Shutdown {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Listens for SIGINT/SIGTERM and trips the shutdown flag.
pub async fn watch_signals(shutdown: Arc<Shutdown>) {
    use tokio::signal::unix::{signal, SignalKind};
    let (Ok(mut term), Ok(mut int)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        error!("failed to install signal handlers");
        return;
    };
    let name = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    };
    info!("received {name}, shutting down");
    shutdown.trigger();
}

/// The whole daemon: every piece of mutable state lives here and is touched
/// only from the cooperative loop.
pub struct Daemon {
    cfg: Config,
    registry: SourceRegistry,
    cursors: CursorStore,
    tracker: SessionTracker,
    exporter: Exporter,
    walkthroughs: HashMap<String, SeenWalkthrough>,
    error_count: u64,
    last_heartbeat: i64,
    cycle: u64,
}

impl Daemon {
    pub fn new(cfg: Config) -> Self {
        let mut registry = SourceRegistry::new(&cfg.home, cfg.shell_monitor);
        let mut cursors = CursorStore::new();
        let now = Utc::now().timestamp();
        registry.refresh(&mut cursors, now, true);

        Daemon {
            registry,
            cursors,
            tracker: SessionTracker::new(cfg.max_tracked_sessions, cfg.max_messages_per_session),
            exporter: Exporter::new(&cfg),
            walkthroughs: HashMap::new(),
            error_count: 0,
            last_heartbeat: now,
            cycle: 0,
            cfg,
        }
    }

    pub async fn run(&mut self, shutdown: Arc<Shutdown>) {
        while !shutdown.is_triggered() {
            let now = Utc::now().timestamp();
            self.run_pass(now).await;

            let sleep_secs = self.next_sleep(Utc::now().timestamp());
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
                _ = shutdown.notified() => {}
            }
        }
        info!(
            "daemon shutdown complete, exported {} sessions total",
            self.exporter.export_count()
        );
    }

    /// One full pass: discover sources, tail them all, sweep idle sessions,
    /// service the outbox, heartbeat. Every failure is contained here.
    pub async fn run_pass(&mut self, now: i64) {
        self.registry.refresh(&mut self.cursors, now, false);

        for source in self.registry.active_jsonl() {
            match tail::jsonl::poll(&source, &mut self.cursors) {
                Ok(events) => {
                    for event in events {
                        self.tracker.upsert(&event.sid, source.name, event.text, now);
                    }
                }
                Err(err) => {
                    self.error_count += 1;
                    error!("tail {}: {err:#}", source.name);
                }
            }
        }

        for source in self.registry.active_shell() {
            match tail::shell::poll(&source, &mut self.cursors, now) {
                Ok(events) => {
                    for event in events {
                        self.tracker.upsert(&event.sid, source.name, event.text, now);
                    }
                }
                Err(err) => {
                    self.error_count += 1;
                    error!("tail {}: {err:#}", source.name);
                }
            }
        }

        let codex = tail::codex::poll(&self.cfg.codex_sessions, &mut self.cursors);
        self.error_count += u64::from(codex.errors);
        for event in codex.events {
            self.tracker
                .upsert(&event.sid, tail::codex::SOURCE_NAME, event.text, now);
        }

        let walkthroughs = tail::walkthrough::poll(&self.cfg.antigravity_brain, &mut self.walkthroughs);
        self.error_count += u64::from(walkthroughs.errors);
        for wt in walkthroughs.exports {
            self.exporter
                .export(
                    &wt.sid,
                    tail::walkthrough::SOURCE_NAME,
                    &[wt.content],
                    Some(tail::walkthrough::TITLE_PREFIX),
                    now,
                )
                .await;
        }

        let due = self
            .tracker
            .sweep_idle(now, self.cfg.idle_timeout_sec, self.cfg.session_ttl_sec);
        for session in due {
            self.exporter
                .export(&session.sid, &session.source, &session.messages, None, now)
                .await;
        }

        self.exporter
            .maybe_retry_pending(now, self.cfg.pending_retry_interval_sec)
            .await;
        self.heartbeat(now);

        self.cycle += 1;
        if self.cycle % HOUSEKEEPING_EVERY == 0 {
            let removed = self.cursors.cleanup(self.cfg.max_file_cursors);
            if removed > 0 {
                info!("cleaned {removed} file cursors");
            }
            self.exporter
                .maybe_retry_pending(now, self.cfg.pending_retry_interval_sec)
                .await;
        }
    }

    pub fn next_sleep(&self, now: i64) -> u64 {
        sched::next_sleep(
            self.cfg.poll_interval_sec,
            self.cfg.fast_poll_interval_sec,
            &SleepInputs {
                outbox_pending: self.exporter.has_pending(),
                min_remaining_idle: self
                    .tracker
                    .min_remaining_idle(now, self.cfg.idle_timeout_sec),
                last_activity_age: self.tracker.last_activity_age(now),
            },
        )
    }

    fn heartbeat(&mut self, now: i64) {
        if now - self.last_heartbeat < self.cfg.heartbeat_interval_sec {
            return;
        }
        self.last_heartbeat = now;

        let active = self.registry.active_names();
        let active = if active.is_empty() {
            "none".to_string()
        } else {
            active.join(",")
        };
        info!(
            "heartbeat sessions={} cursors={} exported={} errors={} pending={} mem={:.1}MB active_sources={active}",
            self.tracker.len(),
            self.cursors.len(),
            self.exporter.export_count(),
            self.error_count,
            self.exporter.pending_count(),
            resident_mb(),
        );
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }
}

/// Peak resident set size in MB, from getrusage. Linux reports kilobytes,
/// macOS bytes. -1.0 when the syscall fails.
fn resident_mb() -> f64 {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } != 0 {
        return -1.0;
    }
    let maxrss = usage.ru_maxrss as f64;
    if cfg!(target_os = "macos") {
        maxrss / (1024.0 * 1024.0)
    } else {
        maxrss / 1024.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flag_round_trip() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn trigger_wakes_a_pending_sleep() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        // The stored permit makes this return immediately instead of hanging.
        tokio::time::timeout(Duration::from_secs(1), shutdown.notified())
            .await
            .expect("notified should resolve after trigger");
    }

    #[test]
    fn resident_mb_reports_something_positive() {
        assert!(resident_mb() > 0.0);
    }
}
