// Conflict policy for local and remote mutations.
//
// Every incoming remote mutation passes through here before touching the
// local store; every local intent is checked here before it is applied
// and published. The policy is deterministic across clients: a lock gate
// first, then a strict (timestamp, user id) ordering so exact ties
// resolve identically everywhere.

use tracing::debug;

use easel_common::error::SyncError;
use easel_common::mutation::ShapeMutation;
use easel_common::types::{Shape, TimestampMs};

use crate::store::ShapeStore;

/// What to do with an incoming remote mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Apply,
    Drop(DropReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// A create for an id that already exists (duplicate or retried
    /// delivery). Creates are idempotent.
    DuplicateCreate,
    /// The target shape is gone (or never arrived here).
    UnknownShape,
    /// The sender does not hold the shape's lock.
    LockHeld { held_by: String },
    /// Lost the (timestamp, user id) ordering against current state.
    Stale,
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    lock_timeout_ms: i64,
}

impl ConflictResolver {
    pub fn new(lock_timeout_ms: i64) -> Self {
        Self { lock_timeout_ms }
    }

    /// Decide whether a remote mutation is applied to the local store.
    pub fn resolve_remote(
        &self,
        store: &ShapeStore,
        mutation: &ShapeMutation,
        now: TimestampMs,
    ) -> Resolution {
        let resolution = self.decide(store, mutation, now);
        if let Resolution::Drop(reason) = &resolution {
            debug!(
                shape_id = mutation.shape_id(),
                kind = mutation.kind_str(),
                from = mutation.user_id(),
                ?reason,
                "dropping remote mutation"
            );
        }
        resolution
    }

    fn decide(&self, store: &ShapeStore, mutation: &ShapeMutation, now: TimestampMs) -> Resolution {
        match mutation {
            ShapeMutation::Create { shape_id, .. } => {
                if store.contains(shape_id) {
                    Resolution::Drop(DropReason::DuplicateCreate)
                } else {
                    Resolution::Apply
                }
            }

            ShapeMutation::Update { shape_id, user_id, timestamp, .. } => {
                let Some(shape) = store.get(shape_id) else {
                    return Resolution::Drop(DropReason::UnknownShape);
                };

                // Lock gate: an update is accepted from the holder, or
                // from anyone when the shape is free — acquiring the lock
                // can be part of the same logical operation.
                if let Some(holder) = shape.lock_holder(now, self.lock_timeout_ms) {
                    if holder != user_id {
                        return Resolution::Drop(DropReason::LockHeld {
                            held_by: holder.to_string(),
                        });
                    }
                }

                if wins(*timestamp, user_id, shape) {
                    Resolution::Apply
                } else {
                    Resolution::Drop(DropReason::Stale)
                }
            }

            ShapeMutation::Delete { shape_id, user_id, .. } => {
                let Some(shape) = store.get(shape_id) else {
                    return Resolution::Drop(DropReason::UnknownShape);
                };
                match shape.lock_holder(now, self.lock_timeout_ms) {
                    Some(holder) if holder != user_id => {
                        Resolution::Drop(DropReason::LockHeld { held_by: holder.to_string() })
                    }
                    _ => Resolution::Apply,
                }
            }
        }
    }

    /// Validate a local update intent before applying/publishing.
    pub fn check_local_update(
        &self,
        store: &ShapeStore,
        shape_id: &str,
        user_id: &str,
        now: TimestampMs,
    ) -> Result<(), SyncError> {
        let shape = store
            .get(shape_id)
            .ok_or_else(|| SyncError::ShapeMissing { shape_id: shape_id.to_string() })?;
        match shape.lock_holder(now, self.lock_timeout_ms) {
            Some(holder) if holder != user_id => {
                Err(SyncError::LockDenied { held_by: holder.to_string() })
            }
            _ => Ok(()),
        }
    }

    /// Validate a local delete intent. Deletes are permitted when the
    /// shape is unlocked or held by the requester.
    pub fn check_local_delete(
        &self,
        store: &ShapeStore,
        shape_id: &str,
        user_id: &str,
        now: TimestampMs,
    ) -> Result<(), SyncError> {
        self.check_local_update(store, shape_id, user_id, now)
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(crate::lock::DEFAULT_LOCK_TIMEOUT_MS)
    }
}

/// Strictly-greater (timestamp, user id) ordering: the later write wins;
/// an exact timestamp tie goes to the lexicographically larger user id.
/// An equal pair is a replay of an already-applied write and loses.
fn wins(timestamp: TimestampMs, user_id: &str, current: &Shape) -> bool {
    (timestamp, user_id) > (current.last_modified_at, current.last_modified_by.as_str())
}

/// Apply an accepted mutation to the store, stamping attribution.
pub fn apply_mutation(store: &mut ShapeStore, mutation: &ShapeMutation) {
    match mutation {
        ShapeMutation::Create { fields, .. } => {
            store.upsert(fields.clone());
        }
        ShapeMutation::Update { shape_id, fields, user_id, timestamp } => {
            if let Some(shape) = store.get_mut(shape_id) {
                fields.apply_to(shape);
                shape.last_modified_by = user_id.clone();
                shape.last_modified_at = *timestamp;
            }
        }
        ShapeMutation::Delete { shape_id, .. } => {
            store.remove(shape_id);
        }
    }
}
