// Advisory per-shape locks embedded in shape fields.
//
// Locks are TTL-driven only:
// - a grant stamps `locked_by`/`locked_at` on the shape
// - renewal re-stamps `locked_at` during an active interaction
// - a lock past `lock_timeout_ms` reads as released everywhere, even
//   before a clearing update arrives
//
// Every grant/release/expiry returns the patch to publish, because lock
// state is a field of the shared shape, not a local concept.

use easel_common::patch::{LockPatch, ShapePatch};
use easel_common::types::TimestampMs;

use crate::store::ShapeStore;

pub const DEFAULT_LOCK_TIMEOUT_MS: i64 = 10_000;

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// Lock taken: fresh, re-entrant, or reassigned from an expired
    /// holder. The patch must be published so other clients observe the
    /// transition.
    Granted { patch: ShapePatch },
    /// Another user holds an unexpired lock.
    Denied { held_by: String },
    /// No shape with this id.
    UnknownShape,
}

#[derive(Debug, Clone, Copy)]
pub struct LockManager {
    lock_timeout_ms: i64,
}

impl LockManager {
    pub fn new(lock_timeout_ms: i64) -> Self {
        Self { lock_timeout_ms }
    }

    pub fn timeout_ms(&self) -> i64 {
        self.lock_timeout_ms
    }

    /// Try to take the lock on `shape_id` for `user_id`.
    ///
    /// Granted when the shape is unlocked, already held by `user_id`
    /// (re-entrant), or the existing lock has expired — in the expired
    /// case the stale lock is reassigned atomically with the new grant.
    pub fn try_acquire(
        &self,
        store: &mut ShapeStore,
        shape_id: &str,
        user_id: &str,
        now: TimestampMs,
    ) -> AcquireOutcome {
        let Some(shape) = store.get_mut(shape_id) else {
            return AcquireOutcome::UnknownShape;
        };

        match shape.lock_holder(now, self.lock_timeout_ms) {
            Some(holder) if holder != user_id => {
                AcquireOutcome::Denied { held_by: holder.to_string() }
            }
            _ => {
                shape.locked_by = Some(user_id.to_string());
                shape.locked_at = Some(now);
                AcquireOutcome::Granted {
                    patch: ShapePatch::lock_transition(LockPatch::Acquire {
                        by: user_id.to_string(),
                        at: now,
                    }),
                }
            }
        }
    }

    /// Release the lock if (and only if) held by `user_id`. Releasing a
    /// lock you do not hold is a no-op, not an error.
    pub fn release(
        &self,
        store: &mut ShapeStore,
        shape_id: &str,
        user_id: &str,
        now: TimestampMs,
    ) -> Option<ShapePatch> {
        let shape = store.get_mut(shape_id)?;
        if shape.lock_holder(now, self.lock_timeout_ms) != Some(user_id) {
            return None;
        }
        shape.locked_by = None;
        shape.locked_at = None;
        Some(ShapePatch::lock_transition(LockPatch::Release))
    }

    /// Extend the holder's lock during a continuous interaction (e.g.
    /// dragging) without relinquishing ownership.
    pub fn renew(
        &self,
        store: &mut ShapeStore,
        shape_id: &str,
        user_id: &str,
        now: TimestampMs,
    ) -> Option<ShapePatch> {
        let shape = store.get_mut(shape_id)?;
        if shape.lock_holder(now, self.lock_timeout_ms) != Some(user_id) {
            return None;
        }
        shape.locked_at = Some(now);
        Some(ShapePatch::lock_transition(LockPatch::Acquire {
            by: user_id.to_string(),
            at: now,
        }))
    }

    /// Clear every expired lock and collect the release patches to
    /// publish.
    ///
    /// Expiry is already honored lazily on every read; the sweep exists
    /// so remote lock indicators clear promptly rather than at the next
    /// touch.
    pub fn sweep_expired(
        &self,
        store: &mut ShapeStore,
        now: TimestampMs,
    ) -> Vec<(String, ShapePatch)> {
        let expired: Vec<String> = store
            .iter()
            .filter(|shape| {
                shape.locked_by.is_some() && shape.lock_holder(now, self.lock_timeout_ms).is_none()
            })
            .map(|shape| shape.id.clone())
            .collect();

        for id in &expired {
            if let Some(shape) = store.get_mut(id) {
                shape.locked_by = None;
                shape.locked_at = None;
            }
        }

        expired
            .into_iter()
            .map(|id| (id, ShapePatch::lock_transition(LockPatch::Release)))
            .collect()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT_MS)
    }
}
