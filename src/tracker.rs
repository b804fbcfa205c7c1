use md5::{Digest, Md5};
use std::collections::HashMap;

/// On message-cap overflow, keep only this many most recent messages.
const RETAIN_ON_OVERFLOW: usize = 200;

/// Minimum messages before an idle session is worth exporting. Shells emit
/// many trivial one-command days; the higher bar suppresses those.
const MIN_MESSAGES_DEFAULT: usize = 2;
const MIN_MESSAGES_SHELL: usize = 4;

pub struct Session {
    pub source: String,
    pub created: i64,
    pub last_seen: i64,
    pub messages: Vec<String>,
    pub last_hash: Option<[u8; 16]>,
    pub exported: bool,
}

/// A session that went idle with enough content to export.
pub struct IdleExport {
    pub sid: String,
    pub source: String,
    pub messages: Vec<String>,
}

/// In-memory aggregation of per-session message streams.
///
/// Bounded two ways: the session table is capped (eviction prefers exported
/// sessions with the oldest `last_seen`), and each session's message list is
/// capped, retaining the most recent tail on overflow. Consecutive identical
/// messages collapse via the last-message digest, which also absorbs line
/// replays after a truncation reset.
pub struct SessionTracker {
    sessions: HashMap<String, Session>,
    max_sessions: usize,
    max_messages: usize,
    last_activity: Option<i64>,
}

impl SessionTracker {
    pub fn new(max_sessions: usize, max_messages: usize) -> Self {
        SessionTracker {
            sessions: HashMap::new(),
            max_sessions,
            max_messages,
            last_activity: None,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, sid: &str) -> Option<&Session> {
        self.sessions.get(sid)
    }

    pub fn upsert(&mut self, sid: &str, source: &str, text: String, now: i64) {
        if !self.sessions.contains_key(sid) {
            if self.sessions.len() >= self.max_sessions {
                self.evict_one();
            }
            self.sessions.insert(
                sid.to_string(),
                Session {
                    source: source.to_string(),
                    created: now,
                    last_seen: now,
                    messages: Vec::new(),
                    last_hash: None,
                    exported: false,
                },
            );
        }

        let session = self.sessions.get_mut(sid).expect("just inserted");
        let digest: [u8; 16] = Md5::digest(text.as_bytes()).into();
        if session.last_hash == Some(digest) {
            return;
        }

        session.messages.push(text);
        session.last_hash = Some(digest);
        session.last_seen = now;
        self.last_activity = Some(now);

        if session.messages.len() > self.max_messages {
            let drop_n = session.messages.len().saturating_sub(RETAIN_ON_OVERFLOW);
            session.messages.drain(..drop_n);
        }
    }

    /// Evict one session to make room: the oldest already-exported one if
    /// any exists, otherwise the oldest overall.
    fn evict_one(&mut self) {
        let victim = self
            .sessions
            .iter()
            .filter(|(_, s)| s.exported)
            .min_by_key(|(_, s)| s.last_seen)
            .or_else(|| self.sessions.iter().min_by_key(|(_, s)| s.last_seen))
            .map(|(sid, _)| sid.clone());
        if let Some(sid) = victim {
            self.sessions.remove(&sid);
        }
    }

    /// Idle/TTL sweep. Removes exported sessions unseen past the TTL, and
    /// returns the idle-expired sessions that met the message threshold.
    /// Every idle-expired session is marked exported whether or not it is
    /// returned, so continued idleness never re-fires.
    pub fn sweep_idle(&mut self, now: i64, idle_timeout: i64, ttl: i64) -> Vec<IdleExport> {
        let mut due = Vec::new();
        let mut expired = Vec::new();

        for (sid, session) in &mut self.sessions {
            if session.exported {
                if now - session.last_seen > ttl {
                    expired.push(sid.clone());
                }
                continue;
            }
            if now - session.last_seen <= idle_timeout {
                continue;
            }

            let threshold = if session.source.starts_with("shell_") {
                MIN_MESSAGES_SHELL
            } else {
                MIN_MESSAGES_DEFAULT
            };
            if session.messages.len() >= threshold {
                due.push(IdleExport {
                    sid: sid.clone(),
                    source: session.source.clone(),
                    messages: session.messages.clone(),
                });
            }
            session.exported = true;
        }

        for sid in expired {
            self.sessions.remove(&sid);
        }
        due
    }

    /// Smallest `idle_timeout - (now - last_seen)` over non-exported
    /// sessions. Negative when a session is already overdue.
    pub fn min_remaining_idle(&self, now: i64, idle_timeout: i64) -> Option<i64> {
        self.sessions
            .values()
            .filter(|s| !s.exported)
            .map(|s| idle_timeout - (now - s.last_seen))
            .min()
    }

    /// Seconds since the last accepted message, if any.
    pub fn last_activity_age(&self, now: i64) -> Option<i64> {
        self.last_activity.map(|ts| now - ts)
    }
}
