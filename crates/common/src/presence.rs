// Ephemeral per-user presence records.
//
// Presence is never persisted: every record is owned by the publishing
// user, merged last-write-wins by `lastSeen`, and considered gone once
// the heartbeat goes quiet.

use serde::{Deserialize, Serialize};

use crate::types::TimestampMs;

/// Cursor colors, picked by a stable hash of the user id so every client
/// derives the same color without coordination.
const CURSOR_PALETTE: [&str; 10] = [
    "#e06c75", "#61afef", "#98c379", "#c678dd", "#e5c07b", "#56b6c2", "#d19a66", "#ef596f",
    "#52adf2", "#89ca78",
];

/// Stable palette color for a user id.
pub fn color_for_user(user_id: &str) -> &'static str {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in user_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    CURSOR_PALETTE[(hash % CURSOR_PALETTE.len() as u64) as usize]
}

/// Per-(canvas, user) ephemeral presence tuple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub cursor_x: f64,
    pub cursor_y: f64,
    #[serde(default)]
    pub is_typing: bool,
    /// Heartbeat timestamp; liveness is judged against this.
    pub last_seen: TimestampMs,
}

impl PresenceRecord {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        now: TimestampMs,
    ) -> Self {
        let user_id = user_id.into();
        let color = color_for_user(&user_id).to_string();
        Self {
            user_id,
            display_name: display_name.into(),
            color,
            cursor_x: 0.0,
            cursor_y: 0.0,
            is_typing: false,
            last_seen: now,
        }
    }

    /// Online iff the last heartbeat is within `presence_timeout_ms`.
    pub fn is_live(&self, now: TimestampMs, presence_timeout_ms: i64) -> bool {
        now - self.last_seen < presence_timeout_ms
    }

    /// Last-write-wins ordering against another record for the same user.
    pub fn supersedes(&self, other: &PresenceRecord) -> bool {
        self.last_seen >= other.last_seen
    }
}
