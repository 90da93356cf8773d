// Client-side presence: throttled cursor publication and peer liveness.
//
// Publication throttling is publisher policy, not a channel guarantee:
// cursor updates go out at most once per `cursor_interval_ms` and only
// after a minimum positional delta. Typing changes and heartbeats always
// publish. Remote records merge last-write-wins and expire purely from
// heartbeat silence — no server-side disconnect callback is relied on.

use std::collections::HashMap;

use easel_common::presence::PresenceRecord;
use easel_common::types::TimestampMs;

pub const DEFAULT_PRESENCE_TIMEOUT_MS: i64 = 20_000;
pub const DEFAULT_CURSOR_INTERVAL_MS: i64 = 33;
pub const DEFAULT_CURSOR_MIN_DELTA: f64 = 0.5;

pub struct PresenceTracker {
    local: PresenceRecord,
    peers: HashMap<String, PresenceRecord>,
    presence_timeout_ms: i64,
    cursor_interval_ms: i64,
    cursor_min_delta: f64,
    last_published_at: TimestampMs,
    last_published_x: f64,
    last_published_y: f64,
}

impl PresenceTracker {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        now: TimestampMs,
    ) -> Self {
        Self::with_tuning(
            user_id,
            display_name,
            now,
            DEFAULT_PRESENCE_TIMEOUT_MS,
            DEFAULT_CURSOR_INTERVAL_MS,
            DEFAULT_CURSOR_MIN_DELTA,
        )
    }

    pub fn with_tuning(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        now: TimestampMs,
        presence_timeout_ms: i64,
        cursor_interval_ms: i64,
        cursor_min_delta: f64,
    ) -> Self {
        Self {
            local: PresenceRecord::new(user_id, display_name, now),
            peers: HashMap::new(),
            presence_timeout_ms,
            cursor_interval_ms,
            cursor_min_delta,
            // Allow an immediate first publication.
            last_published_at: now - cursor_interval_ms - 1,
            last_published_x: f64::NAN,
            last_published_y: f64::NAN,
        }
    }

    pub fn local(&self) -> &PresenceRecord {
        &self.local
    }

    /// Move the local cursor. Returns a record to publish unless the
    /// update is throttled (too soon, or moved less than the minimum
    /// delta).
    pub fn cursor_moved(&mut self, x: f64, y: f64, now: TimestampMs) -> Option<PresenceRecord> {
        self.local.cursor_x = x;
        self.local.cursor_y = y;
        self.local.last_seen = now;

        if now - self.last_published_at < self.cursor_interval_ms {
            return None;
        }
        if !self.last_published_x.is_nan() {
            let dx = x - self.last_published_x;
            let dy = y - self.last_published_y;
            if (dx * dx + dy * dy).sqrt() < self.cursor_min_delta {
                return None;
            }
        }

        self.last_published_at = now;
        self.last_published_x = x;
        self.last_published_y = y;
        Some(self.local.clone())
    }

    /// Toggle the typing indicator. Publishes immediately on change.
    pub fn set_typing(&mut self, typing: bool, now: TimestampMs) -> Option<PresenceRecord> {
        if self.local.is_typing == typing {
            return None;
        }
        self.local.is_typing = typing;
        self.local.last_seen = now;
        Some(self.local.clone())
    }

    /// Liveness heartbeat. Always publishes.
    pub fn heartbeat(&mut self, now: TimestampMs) -> PresenceRecord {
        self.local.last_seen = now;
        self.local.clone()
    }

    /// Apply a remote record, last-write-wins per user. Own echoes are
    /// ignored. Returns whether anything changed.
    pub fn apply_remote(&mut self, record: PresenceRecord) -> bool {
        if record.user_id == self.local.user_id {
            return false;
        }
        match self.peers.get(&record.user_id) {
            Some(existing) if !record.supersedes(existing) => false,
            _ => {
                self.peers.insert(record.user_id.clone(), record);
                true
            }
        }
    }

    /// Drop a peer on an explicit leave signal.
    pub fn remove_peer(&mut self, user_id: &str) -> bool {
        self.peers.remove(user_id).is_some()
    }

    pub fn peer(&self, user_id: &str) -> Option<&PresenceRecord> {
        self.peers.get(user_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Peers whose heartbeat is still fresh at `now`.
    pub fn online_peers(&self, now: TimestampMs) -> Vec<&PresenceRecord> {
        let mut peers: Vec<&PresenceRecord> = self
            .peers
            .values()
            .filter(|record| record.is_live(now, self.presence_timeout_ms))
            .collect();
        peers.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        peers
    }

    /// Drop peers past the liveness threshold and return their ids.
    pub fn expire_idle(&mut self, now: TimestampMs) -> Vec<String> {
        let timeout = self.presence_timeout_ms;
        let mut expired: Vec<String> = self
            .peers
            .values()
            .filter(|record| !record.is_live(now, timeout))
            .map(|record| record.user_id.clone())
            .collect();
        expired.sort();
        for user_id in &expired {
            self.peers.remove(user_id);
        }
        expired
    }
}
