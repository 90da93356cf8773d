// Canvas session: glue between the store, locks, conflict policy,
// history, and presence for one (canvas, user) pair.
//
// All methods are synchronous against local state and return the wire
// message(s) the caller must publish — the session itself never touches
// the transport. Local edits apply optimistically before any remote
// confirmation; remote state arriving later is reconciled through the
// conflict resolver and snapshots.

use tracing::debug;

use easel_common::error::SyncError;
use easel_common::mutation::ShapeMutation;
use easel_common::patch::{LockPatch, ShapePatch};
use easel_common::presence::PresenceRecord;
use easel_common::protocol::WsMessage;
use easel_common::types::{Shape, TimestampMs};

use crate::channel::ChannelEvent;
use crate::config::SyncTuning;
use crate::history::{HistoryEntry, HistoryManager, HistoryOp, PopOutcome};
use crate::lock::{AcquireOutcome, LockManager};
use crate::presence::PresenceTracker;
use crate::resolver::{apply_mutation, ConflictResolver, Resolution};
use crate::store::ShapeStore;

/// Connectivity indicator for the UI: a passive signal, edits keep
/// working offline and replay on recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

pub struct CanvasSession {
    canvas_id: String,
    user_id: String,
    store: ShapeStore,
    locks: LockManager,
    resolver: ConflictResolver,
    history: HistoryManager,
    presence: PresenceTracker,
    connectivity: Connectivity,
    /// High-water mark for locally issued mutation timestamps.
    clock: TimestampMs,
}

impl CanvasSession {
    pub fn new(
        canvas_id: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        tuning: SyncTuning,
        now: TimestampMs,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            canvas_id: canvas_id.into(),
            user_id: user_id.clone(),
            store: ShapeStore::new(),
            locks: LockManager::new(tuning.lock_timeout_ms),
            resolver: ConflictResolver::new(tuning.lock_timeout_ms),
            history: HistoryManager::new(),
            presence: PresenceTracker::with_tuning(
                user_id,
                display_name,
                now,
                tuning.presence_timeout_ms,
                tuning.cursor_interval_ms,
                tuning.cursor_min_delta,
            ),
            connectivity: Connectivity::Offline,
            clock: 0,
        }
    }

    /// Timestamp for a locally issued mutation. Strictly monotonic, so
    /// two edits in the same millisecond still order correctly at every
    /// receiver instead of the second being dropped as a replay.
    fn tick(&mut self, now: TimestampMs) -> TimestampMs {
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn store(&self) -> &ShapeStore {
        &self.store
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ── Local intents ───────────────────────────────────────────────

    /// Create a shape authored locally: optimistic apply, history push,
    /// returns the mutation to publish.
    pub fn create_shape(&mut self, shape: Shape, now: TimestampMs) -> Result<WsMessage, SyncError> {
        if self.store.contains(&shape.id) {
            return Err(SyncError::ShapeExists { shape_id: shape.id });
        }
        let now = self.tick(now);

        let mut shape = shape;
        shape.last_modified_by = self.user_id.clone();
        shape.last_modified_at = now;
        let mutation = ShapeMutation::Create {
            shape_id: shape.id.clone(),
            fields: shape.clone(),
            user_id: self.user_id.clone(),
            timestamp: now,
        };
        self.store.upsert(shape.clone());
        self.history.push(HistoryEntry::new(shape.id, HistoryOp::Remove));
        Ok(self.wire(mutation))
    }

    /// Take the lock on a shape (selection intent). A denial is surfaced
    /// as visual feedback, never an alert.
    pub fn select_shape(
        &mut self,
        shape_id: &str,
        now: TimestampMs,
    ) -> Result<WsMessage, SyncError> {
        let now = self.tick(now);
        match self.locks.try_acquire(&mut self.store, shape_id, &self.user_id, now) {
            AcquireOutcome::Granted { patch } => Ok(self.lock_update(shape_id, patch, now)),
            AcquireOutcome::Denied { held_by } => Err(SyncError::LockDenied { held_by }),
            AcquireOutcome::UnknownShape => {
                Err(SyncError::ShapeMissing { shape_id: shape_id.to_string() })
            }
        }
    }

    /// Release a held lock (deselection). `None` when not the holder —
    /// a no-op, not an error.
    pub fn release_shape(&mut self, shape_id: &str, now: TimestampMs) -> Option<WsMessage> {
        let now = self.tick(now);
        let patch = self.locks.release(&mut self.store, shape_id, &self.user_id, now)?;
        Some(self.lock_update(shape_id, patch, now))
    }

    /// Keep a held lock alive during a continuous interaction.
    pub fn renew_lock(&mut self, shape_id: &str, now: TimestampMs) -> Option<WsMessage> {
        let now = self.tick(now);
        let patch = self.locks.renew(&mut self.store, shape_id, &self.user_id, now)?;
        Some(self.lock_update(shape_id, patch, now))
    }

    /// Edit shape fields. Requires holding the lock or the shape being
    /// free — a free shape is locked implicitly as part of the same
    /// logical operation ("select then drag" is one intent), and an
    /// already-held lock is renewed by the activity.
    pub fn update_shape(
        &mut self,
        shape_id: &str,
        patch: ShapePatch,
        now: TimestampMs,
    ) -> Result<WsMessage, SyncError> {
        self.resolver.check_local_update(&self.store, shape_id, &self.user_id, now)?;
        let now = self.tick(now);
        let shape = self
            .store
            .get(shape_id)
            .ok_or_else(|| SyncError::ShapeMissing { shape_id: shape_id.to_string() })?;

        let inverse = patch.inverse_against(shape);
        let mut forward = patch.clone();
        forward.lock = None;

        let mut patch = patch;
        patch.lock =
            Some(LockPatch::Acquire { by: self.user_id.clone(), at: now });

        let mutation = ShapeMutation::Update {
            shape_id: shape_id.to_string(),
            fields: patch,
            user_id: self.user_id.clone(),
            timestamp: now,
        };
        apply_mutation(&mut self.store, &mutation);
        self.history.push(HistoryEntry::new(
            shape_id,
            HistoryOp::Patch { patch: inverse, opposite: forward },
        ));
        Ok(self.wire(mutation))
    }

    /// Delete a shape. Permitted when unlocked or held by the caller;
    /// otherwise the locked-object signal comes back as `LockDenied`.
    pub fn delete_shape(
        &mut self,
        shape_id: &str,
        now: TimestampMs,
    ) -> Result<WsMessage, SyncError> {
        self.resolver.check_local_delete(&self.store, shape_id, &self.user_id, now)?;
        let now = self.tick(now);
        let snapshot = self
            .store
            .get(shape_id)
            .cloned()
            .ok_or_else(|| SyncError::ShapeMissing { shape_id: shape_id.to_string() })?;

        let mutation = ShapeMutation::Delete {
            shape_id: shape_id.to_string(),
            user_id: self.user_id.clone(),
            timestamp: now,
        };
        apply_mutation(&mut self.store, &mutation);
        self.history
            .push(HistoryEntry::new(shape_id, HistoryOp::Recreate { snapshot }));
        Ok(self.wire(mutation))
    }

    // ── Undo / redo ─────────────────────────────────────────────────

    /// Undo the local user's most recent operation.
    ///
    /// `Ok(None)` when there is nothing to undo. A stale entry — one a
    /// remote edit invalidated — is consumed and refused as
    /// `HistoryStale`, surfaced as a disabled/no-op undo.
    pub fn undo(&mut self, now: TimestampMs) -> Result<Option<WsMessage>, SyncError> {
        let now = self.tick(now);
        match self.history.pop_undo() {
            PopOutcome::Empty => Ok(None),
            PopOutcome::Stale { shape_id } => Err(SyncError::HistoryStale { shape_id }),
            PopOutcome::Entry(entry) => match self.apply_history_op(&entry, now) {
                Ok((message, opposite)) => {
                    self.history.stash_redo(opposite);
                    Ok(Some(message))
                }
                Err(SyncError::HistoryStale { shape_id }) => {
                    Err(SyncError::HistoryStale { shape_id })
                }
                Err(error) => {
                    // Recoverable (e.g. a foreign lock): keep the entry
                    // for a later retry.
                    self.history.stash_undo(entry);
                    Err(error)
                }
            },
        }
    }

    /// Re-apply the most recently undone operation.
    pub fn redo(&mut self, now: TimestampMs) -> Result<Option<WsMessage>, SyncError> {
        let now = self.tick(now);
        match self.history.pop_redo() {
            PopOutcome::Empty => Ok(None),
            PopOutcome::Stale { shape_id } => Err(SyncError::HistoryStale { shape_id }),
            PopOutcome::Entry(entry) => match self.apply_history_op(&entry, now) {
                Ok((message, opposite)) => {
                    self.history.stash_undo(opposite);
                    Ok(Some(message))
                }
                Err(SyncError::HistoryStale { shape_id }) => {
                    Err(SyncError::HistoryStale { shape_id })
                }
                Err(error) => {
                    self.history.stash_redo(entry);
                    Err(error)
                }
            },
        }
    }

    /// Apply a history operation, returning the wire message and the
    /// entry for the opposite stack.
    fn apply_history_op(
        &mut self,
        entry: &HistoryEntry,
        now: TimestampMs,
    ) -> Result<(WsMessage, HistoryEntry), SyncError> {
        match &entry.op {
            HistoryOp::Remove => {
                self.resolver.check_local_delete(&self.store, &entry.shape_id, &self.user_id, now)?;
                let snapshot = self.store.get(&entry.shape_id).cloned().ok_or_else(|| {
                    SyncError::HistoryStale { shape_id: entry.shape_id.clone() }
                })?;
                let mutation = ShapeMutation::Delete {
                    shape_id: entry.shape_id.clone(),
                    user_id: self.user_id.clone(),
                    timestamp: now,
                };
                apply_mutation(&mut self.store, &mutation);
                let opposite =
                    HistoryEntry::new(&entry.shape_id, HistoryOp::Recreate { snapshot });
                Ok((self.wire(mutation), opposite))
            }

            HistoryOp::Patch { patch, opposite } => {
                self.resolver.check_local_update(&self.store, &entry.shape_id, &self.user_id, now)?;
                let mutation = ShapeMutation::Update {
                    shape_id: entry.shape_id.clone(),
                    fields: patch.clone(),
                    user_id: self.user_id.clone(),
                    timestamp: now,
                };
                apply_mutation(&mut self.store, &mutation);
                let opposite = HistoryEntry::new(
                    &entry.shape_id,
                    HistoryOp::Patch { patch: opposite.clone(), opposite: patch.clone() },
                );
                Ok((self.wire(mutation), opposite))
            }

            HistoryOp::Recreate { snapshot } => {
                if self.store.contains(&entry.shape_id) {
                    return Err(SyncError::HistoryStale { shape_id: entry.shape_id.clone() });
                }
                let mut shape = snapshot.clone();
                shape.last_modified_by = self.user_id.clone();
                shape.last_modified_at = now;
                shape.locked_by = None;
                shape.locked_at = None;
                let mutation = ShapeMutation::Create {
                    shape_id: shape.id.clone(),
                    fields: shape,
                    user_id: self.user_id.clone(),
                    timestamp: now,
                };
                apply_mutation(&mut self.store, &mutation);
                let opposite = HistoryEntry::new(&entry.shape_id, HistoryOp::Remove);
                Ok((self.wire(mutation), opposite))
            }
        }
    }

    // ── Presence ────────────────────────────────────────────────────

    /// Move the local cursor. Returns a throttled presence message.
    pub fn cursor_moved(&mut self, x: f64, y: f64, now: TimestampMs) -> Option<WsMessage> {
        let record = self.presence.cursor_moved(x, y, now)?;
        Some(WsMessage::Presence { canvas_id: self.canvas_id.clone(), record })
    }

    /// Toggle the typing indicator.
    pub fn set_typing(&mut self, typing: bool, now: TimestampMs) -> Option<WsMessage> {
        let record = self.presence.set_typing(typing, now)?;
        Some(WsMessage::Presence { canvas_id: self.canvas_id.clone(), record })
    }

    /// Liveness heartbeat to publish on a timer.
    pub fn heartbeat(&mut self, now: TimestampMs) -> WsMessage {
        let record = self.presence.heartbeat(now);
        WsMessage::Presence { canvas_id: self.canvas_id.clone(), record }
    }

    /// Peers currently considered online.
    pub fn online_peers(&self, now: TimestampMs) -> Vec<&PresenceRecord> {
        self.presence.online_peers(now)
    }

    // ── Remote events ───────────────────────────────────────────────

    /// Feed one channel event through the session.
    pub fn handle_event(&mut self, event: ChannelEvent, now: TimestampMs) {
        match event {
            ChannelEvent::Connected => {
                self.connectivity = Connectivity::Online;
            }
            ChannelEvent::Disconnected { reason } => {
                debug!(%reason, "sync channel offline");
                self.connectivity = Connectivity::Offline;
            }
            ChannelEvent::Snapshot { canvas_id, shapes, .. } => {
                if canvas_id == self.canvas_id {
                    self.apply_snapshot(shapes);
                }
            }
            ChannelEvent::RemoteMutation { canvas_id, mutation } => {
                if canvas_id == self.canvas_id {
                    self.apply_remote(mutation, now);
                }
            }
            ChannelEvent::RemotePresence { canvas_id, record } => {
                if canvas_id == self.canvas_id {
                    self.presence.apply_remote(record);
                }
            }
            ChannelEvent::PresenceLeft { canvas_id, user_id } => {
                if canvas_id == self.canvas_id {
                    self.presence.remove_peer(&user_id);
                }
            }
            ChannelEvent::ProtocolError { code, message, .. } => {
                debug!(%code, %message, "relay reported a protocol error");
            }
        }
    }

    /// Run one remote mutation through the conflict policy. Returns
    /// whether it was applied.
    pub fn apply_remote(&mut self, mutation: ShapeMutation, now: TimestampMs) -> bool {
        if mutation.user_id() == self.user_id {
            // Own echo; local state already reflects it.
            return false;
        }

        match self.resolver.resolve_remote(&self.store, &mutation, now) {
            Resolution::Apply => {
                apply_mutation(&mut self.store, &mutation);
                match &mutation {
                    ShapeMutation::Create { shape_id, .. } => {
                        self.history.invalidate_create(shape_id);
                    }
                    ShapeMutation::Update { shape_id, fields, .. } => {
                        self.history.invalidate_update(shape_id, fields);
                    }
                    ShapeMutation::Delete { shape_id, .. } => {
                        self.history.invalidate_delete(shape_id);
                    }
                }
                true
            }
            Resolution::Drop(_) => false,
        }
    }

    /// Reconcile against a fresh snapshot (join or reconnection gap).
    ///
    /// The snapshot replaces the local view wholesale; history entries
    /// whose assumptions no longer hold go stale. Unacknowledged local
    /// mutations survive through the channel's replay queue, not here.
    pub fn apply_snapshot(&mut self, shapes: Vec<Shape>) {
        self.store.apply_snapshot(shapes);
        let store = &self.store;
        self.history.reconcile_snapshot(|shape_id| store.contains(shape_id));
    }

    // ── Periodic sweep ──────────────────────────────────────────────

    /// Timer-driven maintenance: publish expiry transitions for stale
    /// locks and drop presence peers whose heartbeat went quiet.
    pub fn sweep(&mut self, now: TimestampMs) -> Vec<WsMessage> {
        let mut messages = Vec::new();
        let expired = self.locks.sweep_expired(&mut self.store, now);
        if !expired.is_empty() {
            // One tick for the batch: the transitions target distinct
            // shapes, so per-shape ordering is unaffected.
            let stamp = self.tick(now);
            for (shape_id, patch) in expired {
                messages.push(self.lock_update(&shape_id, patch, stamp));
            }
        }
        for user_id in self.presence.expire_idle(now) {
            debug!(%user_id, "presence expired locally");
        }
        messages
    }

    fn wire(&self, mutation: ShapeMutation) -> WsMessage {
        WsMessage::Mutation { canvas_id: self.canvas_id.clone(), mutation }
    }

    /// Wrap a lock transition as an ordinary shape update so every
    /// client sees the new lock fields promptly. Applied locally too,
    /// keeping attribution stamps identical on all replicas.
    fn lock_update(&mut self, shape_id: &str, patch: ShapePatch, now: TimestampMs) -> WsMessage {
        let mutation = ShapeMutation::Update {
            shape_id: shape_id.to_string(),
            fields: patch,
            user_id: self.user_id.clone(),
            timestamp: now,
        };
        apply_mutation(&mut self.store, &mutation);
        self.wire(mutation)
    }
}
