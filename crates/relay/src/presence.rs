// Ephemeral presence store with TTL sweeping.
//
// Keyed by (canvas, user), merged last-write-wins by `lastSeen`, and
// never persisted. Removal on socket close is a best-effort
// optimization; the periodic heartbeat-expiry sweep is the authoritative
// absence signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use easel_common::presence::PresenceRecord;
use easel_common::protocol::WsMessage;
use easel_common::types::{now_ms, TimestampMs};

use crate::hub::SessionRegistry;

#[derive(Debug, Clone, Default)]
pub struct PresenceStore {
    state: Arc<RwLock<HashMap<(String, String), PresenceRecord>>>,
}

impl PresenceStore {
    /// Last-write-wins upsert; a record older than the stored one is
    /// ignored. Returns whether anything changed.
    pub async fn update(&self, canvas_id: &str, record: PresenceRecord) -> bool {
        let key = (canvas_id.to_string(), record.user_id.clone());
        let mut guard = self.state.write().await;
        match guard.get(&key) {
            Some(existing) if !record.supersedes(existing) => false,
            _ => {
                guard.insert(key, record);
                true
            }
        }
    }

    /// Drop one (canvas, user) record. Returns whether it existed.
    pub async fn remove(&self, canvas_id: &str, user_id: &str) -> bool {
        let mut guard = self.state.write().await;
        guard.remove(&(canvas_id.to_string(), user_id.to_string())).is_some()
    }

    /// All records for a canvas that are still live at `now`.
    pub async fn live_for_canvas(
        &self,
        canvas_id: &str,
        now: TimestampMs,
        timeout_ms: i64,
    ) -> Vec<PresenceRecord> {
        let guard = self.state.read().await;
        let mut records: Vec<PresenceRecord> = guard
            .iter()
            .filter(|((canvas, _), record)| {
                canvas == canvas_id && record.is_live(now, timeout_ms)
            })
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        records
    }

    /// Drop expired records and return their (canvas, user) pairs so the
    /// caller can broadcast departures.
    pub async fn expire_idle(&self, now: TimestampMs, timeout_ms: i64) -> Vec<(String, String)> {
        let mut guard = self.state.write().await;
        let mut expired: Vec<(String, String)> = guard
            .iter()
            .filter(|(_, record)| !record.is_live(now, timeout_ms))
            .map(|(key, _)| key.clone())
            .collect();
        expired.sort();
        for key in &expired {
            guard.remove(key);
        }
        expired
    }
}

/// Periodic TTL sweep broadcasting departures for peers whose heartbeat
/// went quiet. Runs for the lifetime of the relay.
pub async fn run_expiry_sweep(
    presence: Arc<PresenceStore>,
    registry: Arc<SessionRegistry>,
    timeout_ms: i64,
    sweep_interval_ms: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(sweep_interval_ms));
    loop {
        interval.tick().await;
        for (canvas_id, user_id) in presence.expire_idle(now_ms(), timeout_ms).await {
            debug!(%canvas_id, %user_id, "presence expired");
            let leave = WsMessage::PresenceLeave {
                canvas_id: canvas_id.clone(),
                user_id,
            };
            let _ = registry.broadcast_to_subscribers(&canvas_id, leave).await;
        }
    }
}
