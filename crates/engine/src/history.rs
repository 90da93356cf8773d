// Client-local undo/redo history.
//
// Stack entries describe the operation that undo (or redo) must apply:
// remove a shape, apply a patch, or recreate from a snapshot. Entries
// cover only the local user's own operations — undo never rewinds another
// user's edits. A remote change that touches state an entry assumes marks
// it stale; a stale entry is refused as a no-op, never applied and never
// a crash.

use easel_common::patch::ShapePatch;
use easel_common::types::Shape;

pub const DEFAULT_MAX_DEPTH: usize = 100;

/// The operation a stack entry applies when popped.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryOp {
    /// Remove the shape (inverse of a local create).
    Remove,
    /// Apply `patch`; `opposite` re-applies the original change when the
    /// entry moves to the other stack.
    Patch { patch: ShapePatch, opposite: ShapePatch },
    /// Recreate the shape from a snapshot (inverse of a local delete).
    Recreate { snapshot: Shape },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub shape_id: String,
    pub op: HistoryOp,
    pub stale: bool,
}

impl HistoryEntry {
    pub fn new(shape_id: impl Into<String>, op: HistoryOp) -> Self {
        Self { shape_id: shape_id.into(), op, stale: false }
    }
}

/// Result of popping a stack.
#[derive(Debug, Clone, PartialEq)]
pub enum PopOutcome {
    /// Nothing recorded.
    Empty,
    /// The top entry was invalidated by a remote edit and has been
    /// discarded. Surfaced as a disabled/no-op undo.
    Stale { shape_id: String },
    /// A valid entry to apply.
    Entry(HistoryEntry),
}

#[derive(Debug, Default)]
pub struct HistoryManager {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    max_depth: usize,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { undo: Vec::new(), redo: Vec::new(), max_depth }
    }

    /// Record a freshly applied local operation. Clears the redo stack.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.redo.clear();
        self.undo.push(entry);
        if self.undo.len() > self.max_depth {
            self.undo.remove(0);
        }
    }

    pub fn pop_undo(&mut self) -> PopOutcome {
        match self.undo.pop() {
            None => PopOutcome::Empty,
            Some(entry) if entry.stale => PopOutcome::Stale { shape_id: entry.shape_id },
            Some(entry) => PopOutcome::Entry(entry),
        }
    }

    pub fn pop_redo(&mut self) -> PopOutcome {
        match self.redo.pop() {
            None => PopOutcome::Empty,
            Some(entry) if entry.stale => PopOutcome::Stale { shape_id: entry.shape_id },
            Some(entry) => PopOutcome::Entry(entry),
        }
    }

    /// Put an entry on the redo stack after a successful undo, or back
    /// after a failed redo.
    pub fn stash_redo(&mut self, entry: HistoryEntry) {
        self.redo.push(entry);
    }

    /// Put an entry on the undo stack after a successful redo, or back
    /// after a failed undo. Does not clear redo.
    pub fn stash_undo(&mut self, entry: HistoryEntry) {
        self.undo.push(entry);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// A remote update with `patch` was applied to `shape_id`.
    ///
    /// Staleness is field-granular: a patch entry survives unless the
    /// remote edit touched a field its own patch would write, so a
    /// position-only undo still applies after a remote fill change.
    /// Remove entries always go stale — removing the shape would clobber
    /// the remote edit wholesale.
    pub fn invalidate_update(&mut self, shape_id: &str, patch: &ShapePatch) {
        if !patch.touches_content() {
            // Pure lock transitions are not edits.
            return;
        }
        for entry in self.entries_for(shape_id) {
            let overlaps = match &entry.op {
                HistoryOp::Remove => true,
                HistoryOp::Patch { patch: own, .. } => own.intersects(patch),
                HistoryOp::Recreate { .. } => false,
            };
            if overlaps {
                entry.stale = true;
            }
        }
    }

    /// A remote delete removed `shape_id`: everything recorded against it
    /// is void.
    pub fn invalidate_delete(&mut self, shape_id: &str) {
        for entry in self.entries_for(shape_id) {
            entry.stale = true;
        }
    }

    /// A remote create resurrected `shape_id`: a pending recreate would
    /// now collide.
    pub fn invalidate_create(&mut self, shape_id: &str) {
        for entry in self.entries_for(shape_id) {
            if matches!(entry.op, HistoryOp::Recreate { .. }) {
                entry.stale = true;
            }
        }
    }

    /// Re-validate all entries after a snapshot replaced the store.
    ///
    /// Field-level divergence cannot be detected against a wholesale
    /// snapshot, so the check is existence-based: patch/remove entries
    /// need their shape present, recreate entries need it absent.
    pub fn reconcile_snapshot(&mut self, exists: impl Fn(&str) -> bool) {
        for entry in self.undo.iter_mut().chain(self.redo.iter_mut()) {
            let valid = match &entry.op {
                HistoryOp::Remove | HistoryOp::Patch { .. } => exists(&entry.shape_id),
                HistoryOp::Recreate { .. } => !exists(&entry.shape_id),
            };
            if !valid {
                entry.stale = true;
            }
        }
    }

    fn entries_for(&mut self, shape_id: &str) -> impl Iterator<Item = &mut HistoryEntry> {
        let shape_id = shape_id.to_string();
        self.undo
            .iter_mut()
            .chain(self.redo.iter_mut())
            .filter(move |entry| entry.shape_id == shape_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{HistoryEntry, HistoryManager, HistoryOp, PopOutcome};
    use easel_common::patch::ShapePatch;
    use easel_common::types::{Shape, ShapeKind};

    fn move_entry(shape_id: &str) -> HistoryEntry {
        HistoryEntry::new(
            shape_id,
            HistoryOp::Patch {
                patch: ShapePatch::position(0.0, 0.0),
                opposite: ShapePatch::position(10.0, 10.0),
            },
        )
    }

    fn fill_patch() -> ShapePatch {
        ShapePatch { fill: Some("#fff".into()), ..Default::default() }
    }

    #[test]
    fn push_then_pop_returns_entry() {
        let mut history = HistoryManager::new();
        history.push(move_entry("s1"));

        match history.pop_undo() {
            PopOutcome::Entry(entry) => assert_eq!(entry.shape_id, "s1"),
            other => panic!("expected entry, got {other:?}"),
        }
        assert_eq!(history.pop_undo(), PopOutcome::Empty);
    }

    #[test]
    fn push_clears_redo() {
        let mut history = HistoryManager::new();
        history.push(move_entry("s1"));
        history.stash_redo(move_entry("s1"));
        assert!(history.can_redo());

        history.push(move_entry("s2"));
        assert!(!history.can_redo());
    }

    #[test]
    fn stash_undo_preserves_redo() {
        let mut history = HistoryManager::new();
        history.stash_redo(move_entry("s1"));
        history.stash_undo(move_entry("s2"));
        assert!(history.can_redo());
        assert!(history.can_undo());
    }

    #[test]
    fn depth_cap_drops_oldest() {
        let mut history = HistoryManager::with_max_depth(2);
        history.push(move_entry("s1"));
        history.push(move_entry("s2"));
        history.push(move_entry("s3"));

        assert_eq!(history.undo_len(), 2);
        match history.pop_undo() {
            PopOutcome::Entry(entry) => assert_eq!(entry.shape_id, "s3"),
            other => panic!("expected entry, got {other:?}"),
        }
    }

    #[test]
    fn remote_edit_of_disjoint_field_keeps_entry_valid() {
        let mut history = HistoryManager::new();
        history.push(move_entry("s1"));

        // Remote changed the fill; our entry only restores x/y.
        history.invalidate_update("s1", &fill_patch());

        assert!(matches!(history.pop_undo(), PopOutcome::Entry(_)));
    }

    #[test]
    fn remote_edit_of_same_field_marks_entry_stale() {
        let mut history = HistoryManager::new();
        history.push(move_entry("s1"));

        history.invalidate_update("s1", &ShapePatch::position(99.0, 99.0));

        assert_eq!(history.pop_undo(), PopOutcome::Stale { shape_id: "s1".into() });
        assert_eq!(history.pop_undo(), PopOutcome::Empty);
    }

    #[test]
    fn lock_only_remote_update_does_not_invalidate() {
        let mut history = HistoryManager::new();
        history.push(move_entry("s1"));

        history.invalidate_update(
            "s1",
            &ShapePatch::lock_transition(easel_common::patch::LockPatch::Release),
        );

        assert!(matches!(history.pop_undo(), PopOutcome::Entry(_)));
    }

    #[test]
    fn remote_delete_invalidates_every_entry_for_the_shape() {
        let mut history = HistoryManager::new();
        history.push(move_entry("s1"));
        history.push(move_entry("s2"));

        history.invalidate_delete("s1");

        match history.pop_undo() {
            PopOutcome::Entry(entry) => assert_eq!(entry.shape_id, "s2"),
            other => panic!("expected s2 entry, got {other:?}"),
        }
        assert_eq!(history.pop_undo(), PopOutcome::Stale { shape_id: "s1".into() });
    }

    #[test]
    fn remove_entry_goes_stale_on_any_remote_content_edit() {
        let mut history = HistoryManager::new();
        history.push(HistoryEntry::new("s1", HistoryOp::Remove));

        history.invalidate_update("s1", &fill_patch());

        assert_eq!(history.pop_undo(), PopOutcome::Stale { shape_id: "s1".into() });
    }

    #[test]
    fn recreate_entry_goes_stale_when_shape_reappears() {
        let snapshot = Shape::new("s1", ShapeKind::Rectangle, "alice", 0);
        let mut history = HistoryManager::new();
        history.push(HistoryEntry::new("s1", HistoryOp::Recreate { snapshot }));

        history.invalidate_create("s1");

        assert_eq!(history.pop_undo(), PopOutcome::Stale { shape_id: "s1".into() });
    }

    #[test]
    fn snapshot_reconcile_checks_existence() {
        let snapshot = Shape::new("gone", ShapeKind::Rectangle, "alice", 0);
        let mut history = HistoryManager::new();
        history.push(move_entry("present"));
        history.push(move_entry("missing"));
        history.push(HistoryEntry::new("gone", HistoryOp::Recreate { snapshot }));

        history.reconcile_snapshot(|id| id == "present");

        // Recreate for "gone": shape absent, still valid.
        assert!(matches!(history.pop_undo(), PopOutcome::Entry(_)));
        // Patch for "missing": shape absent, stale.
        assert_eq!(history.pop_undo(), PopOutcome::Stale { shape_id: "missing".into() });
        // Patch for "present": valid.
        assert!(matches!(history.pop_undo(), PopOutcome::Entry(_)));
    }
}
