// Multi-client convergence scenarios: two sessions exchanging mutations
// the way the relay would fan them out.

use easel_common::error::SyncError;
use easel_common::mutation::ShapeMutation;
use easel_common::patch::ShapePatch;
use easel_common::protocol::WsMessage;
use easel_common::types::{Shape, ShapeKind};
use easel_engine::channel::ChannelEvent;
use easel_engine::config::SyncTuning;
use easel_engine::session::CanvasSession;

fn session(user: &str) -> CanvasSession {
    CanvasSession::new("canvas-1", user, user.to_uppercase(), SyncTuning::default(), 0)
}

fn rect(id: &str) -> Shape {
    let mut shape = Shape::new(id, ShapeKind::Rectangle, "unset", 0);
    shape.x = 10.0;
    shape.y = 10.0;
    shape.width = 100.0;
    shape.height = 50.0;
    shape.fill = "#336699".to_string();
    shape
}

fn mutation_of(message: &WsMessage) -> ShapeMutation {
    match message {
        WsMessage::Mutation { mutation, .. } => mutation.clone(),
        other => panic!("expected mutation message, got {other:?}"),
    }
}

/// Deliver a published message to a peer session, as the relay would.
fn deliver(message: &WsMessage, to: &mut CanvasSession, now: i64) -> bool {
    to.apply_remote(mutation_of(message), now)
}

fn fill_update(user: &str, timestamp: i64, fill: &str) -> ShapeMutation {
    ShapeMutation::Update {
        shape_id: "s1".into(),
        fields: ShapePatch { fill: Some(fill.into()), ..Default::default() },
        user_id: user.into(),
        timestamp,
    }
}

// ── Locking (scenarios A and B) ─────────────────────────────────────

#[test]
fn concurrent_acquisition_grants_one_holder() {
    let mut x = session("X");
    let mut y = session("Y");
    let t0 = 1_000;

    let create = x.create_shape(rect("s1"), t0).expect("create should succeed");
    assert!(deliver(&create, &mut y, t0));

    let select = x.select_shape("s1", t0).expect("X should get the lock");
    assert!(deliver(&select, &mut y, t0));

    // Y sees X's lock and is denied.
    assert_eq!(
        y.select_shape("s1", t0),
        Err(SyncError::LockDenied { held_by: "X".to_string() })
    );

    // Each replica has exactly one holder.
    assert_eq!(x.store().get("s1").and_then(|s| s.lock_holder(t0, 10_000)), Some("X"));
    assert_eq!(y.store().get("s1").and_then(|s| s.lock_holder(t0, 10_000)), Some("X"));
}

#[test]
fn unrenewed_lock_expires_and_hands_over() {
    let mut x = session("X");
    let mut y = session("Y");
    let t0 = 1_000;

    let create = x.create_shape(rect("s1"), t0).expect("create should succeed");
    deliver(&create, &mut y, t0);
    let select = x.select_shape("s1", t0).expect("X should get the lock");
    deliver(&select, &mut y, t0);

    // Still held just before the timeout.
    assert!(matches!(
        y.select_shape("s1", t0 + 9_999),
        Err(SyncError::LockDenied { .. })
    ));

    // Past the timeout the stale lock reads as released and Y succeeds.
    let handover = y.select_shape("s1", t0 + 10_001).expect("Y should take the expired lock");
    assert!(deliver(&handover, &mut x, t0 + 10_001));
    assert_eq!(
        x.store().get("s1").and_then(|s| s.lock_holder(t0 + 10_001, 10_000)),
        Some("Y")
    );
}

#[test]
fn sweep_propagates_lock_expiry_to_the_former_holder() {
    let mut x = session("X");
    let mut y = session("Y");
    let t0 = 1_000;

    let create = x.create_shape(rect("s1"), t0).expect("create should succeed");
    deliver(&create, &mut y, t0);
    let select = x.select_shape("s1", t0).expect("X should get the lock");
    deliver(&select, &mut y, t0);

    // Y's periodic sweep notices the expiry and publishes the release.
    let released = y.sweep(t0 + 10_001);
    assert_eq!(released.len(), 1);
    assert!(deliver(&released[0], &mut x, t0 + 10_001));

    assert!(x.store().get("s1").and_then(|s| s.locked_by.clone()).is_none());
    assert!(y.store().get("s1").and_then(|s| s.locked_by.clone()).is_none());
}

#[test]
fn update_under_foreign_lock_is_rejected_on_both_sides() {
    let mut x = session("X");
    let mut y = session("Y");
    let t0 = 1_000;

    let create = x.create_shape(rect("s1"), t0).expect("create should succeed");
    deliver(&create, &mut y, t0);
    let select = x.select_shape("s1", t0).expect("X should get the lock");
    deliver(&select, &mut y, t0);

    // Locally: Y cannot edit.
    assert!(matches!(
        y.update_shape("s1", ShapePatch::position(0.0, 0.0), t0 + 1),
        Err(SyncError::LockDenied { .. })
    ));

    // Remotely: a forged update from Y would not be applied by X either.
    assert!(!x.apply_remote(fill_update("Y", t0 + 1, "#ff0000"), t0 + 1));
}

// ── Deterministic tie-break (scenario C) ────────────────────────────

#[test]
fn equal_timestamps_resolve_to_the_larger_user_id_everywhere() {
    let mut first = session("obs1");
    let mut second = session("obs2");

    let mut seed = session("seed");
    let create = seed.create_shape(rect("s1"), 10).expect("create should succeed");
    deliver(&create, &mut first, 10);
    deliver(&create, &mut second, 10);

    let alice = fill_update("alice", 100, "#aaaaaa");
    let bob = fill_update("bob", 100, "#bbbbbb");

    // Opposite delivery orders.
    first.apply_remote(alice.clone(), 100);
    first.apply_remote(bob.clone(), 100);
    second.apply_remote(bob, 100);
    second.apply_remote(alice, 100);

    let first_shape = first.store().get("s1").expect("shape on first");
    let second_shape = second.store().get("s1").expect("shape on second");
    assert_eq!(first_shape.fill, "#bbbbbb");
    assert_eq!(second_shape.fill, "#bbbbbb");
    assert_eq!(first_shape.last_modified_by, "bob");
    assert_eq!(second_shape.last_modified_by, "bob");
}

// ── Replay idempotence ──────────────────────────────────────────────

#[test]
fn create_update_delete_stream_is_idempotent_under_replay() {
    let mut observer = session("observer");

    let create = ShapeMutation::Create {
        shape_id: "s1".into(),
        fields: rect("s1"),
        user_id: "alice".into(),
        timestamp: 10,
    };
    let update = fill_update("alice", 20, "#ff0000");
    let delete =
        ShapeMutation::Delete { shape_id: "s1".into(), user_id: "alice".into(), timestamp: 30 };

    assert!(observer.apply_remote(create.clone(), 10));
    // Replaying the same create is a no-op that leaves the store unchanged.
    let before = observer.store().list();
    assert!(!observer.apply_remote(create.clone(), 11));
    assert_eq!(observer.store().list(), before);

    assert!(observer.apply_remote(update.clone(), 20));
    assert!(!observer.apply_remote(update, 21));
    assert_eq!(observer.store().get("s1").map(|s| s.fill.clone()), Some("#ff0000".into()));

    assert!(observer.apply_remote(delete.clone(), 30));
    assert!(!observer.apply_remote(delete, 31));
    assert!(observer.store().is_empty());

    // The create arriving again after the delete recreates nothing new:
    // it is a fresh id-space decision, applied as a late create.
    assert!(observer.apply_remote(create, 40));
}

// ── Snapshots ───────────────────────────────────────────────────────

#[test]
fn snapshot_round_trip_preserves_the_shape_set() {
    let mut alice = session("alice");
    alice.create_shape(rect("s1"), 10).expect("create should succeed");
    alice.create_shape(rect("s2"), 20).expect("create should succeed");

    let mut snapshot = alice.store().list();

    let mut joiner = session("joiner");
    joiner.handle_event(
        ChannelEvent::Snapshot {
            canvas_id: "canvas-1".into(),
            shapes: snapshot.clone(),
            last_updated: 20,
        },
        30,
    );

    let mut joined = joiner.store().list();
    snapshot.sort_by(|a, b| a.id.cmp(&b.id));
    joined.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(snapshot, joined);
}

// ── Presence over the channel ───────────────────────────────────────

#[test]
fn presence_expires_without_heartbeat() {
    let mut alice = session("alice");
    let mut bob = session("bob");

    let heartbeat = alice.heartbeat(1_000);
    match heartbeat {
        WsMessage::Presence { canvas_id, record } => {
            bob.handle_event(ChannelEvent::RemotePresence { canvas_id, record }, 1_000);
        }
        other => panic!("expected presence message, got {other:?}"),
    }
    assert_eq!(bob.online_peers(1_000).len(), 1);

    // No further heartbeats: alice disappears within the presence
    // timeout without any explicit removal.
    assert!(bob.online_peers(21_000).is_empty());
    bob.sweep(21_000);
    assert_eq!(bob.presence().peer_count(), 0);
}

#[test]
fn explicit_leave_removes_the_peer_immediately() {
    let mut bob = session("bob");
    let mut alice = session("alice");

    let heartbeat = alice.heartbeat(1_000);
    if let WsMessage::Presence { canvas_id, record } = heartbeat {
        bob.handle_event(ChannelEvent::RemotePresence { canvas_id, record }, 1_000);
    }
    assert_eq!(bob.online_peers(1_000).len(), 1);

    bob.handle_event(
        ChannelEvent::PresenceLeft { canvas_id: "canvas-1".into(), user_id: "alice".into() },
        1_001,
    );
    assert!(bob.online_peers(1_001).is_empty());
}

// ── History against remote edits (scenario D) ───────────────────────

#[test]
fn position_undo_survives_a_remote_fill_change() {
    let mut alice = session("alice");
    alice.create_shape(rect("s2"), 10).expect("create should succeed");

    alice
        .update_shape("s2", ShapePatch::position(50.0, 60.0), 20)
        .expect("move should succeed");
    alice.release_shape("s2", 21).expect("release should publish");

    // A remote edit touches only the fill.
    let remote = ShapeMutation::Update {
        shape_id: "s2".into(),
        fields: ShapePatch { fill: Some("#00ff00".into()), ..Default::default() },
        user_id: "bob".into(),
        timestamp: 30,
    };
    assert!(alice.apply_remote(remote, 30));

    // The position-only inverse still applies and does not clobber the
    // remotely-changed fill.
    alice.undo(40).expect("undo should succeed").expect("undo should produce a mutation");
    let shape = alice.store().get("s2").expect("shape should exist");
    assert_eq!((shape.x, shape.y), (10.0, 10.0));
    assert_eq!(shape.fill, "#00ff00");
}

#[test]
fn undo_is_refused_when_a_remote_edit_touched_the_same_field() {
    let mut alice = session("alice");
    alice.create_shape(rect("s2"), 10).expect("create should succeed");
    alice
        .update_shape("s2", ShapePatch::position(50.0, 60.0), 20)
        .expect("move should succeed");
    alice.release_shape("s2", 21).expect("release should publish");

    let remote = ShapeMutation::Update {
        shape_id: "s2".into(),
        fields: ShapePatch::position(500.0, 600.0),
        user_id: "bob".into(),
        timestamp: 30,
    };
    assert!(alice.apply_remote(remote, 30));

    assert_eq!(
        alice.undo(40),
        Err(SyncError::HistoryStale { shape_id: "s2".to_string() })
    );
    // The remote position is untouched.
    let shape = alice.store().get("s2").expect("shape should exist");
    assert_eq!((shape.x, shape.y), (500.0, 600.0));
}

#[test]
fn undo_is_refused_after_a_remote_delete() {
    let mut alice = session("alice");
    alice.create_shape(rect("s2"), 10).expect("create should succeed");
    alice
        .update_shape("s2", ShapePatch::position(50.0, 60.0), 20)
        .expect("move should succeed");
    alice.release_shape("s2", 21).expect("release should publish");

    let remote =
        ShapeMutation::Delete { shape_id: "s2".into(), user_id: "bob".into(), timestamp: 30 };
    assert!(alice.apply_remote(remote, 30));

    // Both history entries for s2 (create, update) are now stale.
    assert_eq!(
        alice.undo(40),
        Err(SyncError::HistoryStale { shape_id: "s2".to_string() })
    );
    assert_eq!(
        alice.undo(41),
        Err(SyncError::HistoryStale { shape_id: "s2".to_string() })
    );
    assert_eq!(alice.undo(42).expect("empty history is not an error"), None);
}

#[test]
fn undo_never_rewinds_another_users_edit() {
    let mut alice = session("alice");
    let mut bob = session("bob");

    let create = alice.create_shape(rect("s1"), 10).expect("create should succeed");
    deliver(&create, &mut bob, 10);

    // Bob has no local operations; his undo is empty even though his
    // store carries alice's shape.
    assert_eq!(bob.undo(20).expect("undo should succeed"), None);
    assert!(bob.store().contains("s1"));
}

#[test]
fn snapshot_reconciliation_marks_vanished_targets_stale() {
    let mut alice = session("alice");
    alice.create_shape(rect("s1"), 10).expect("create should succeed");
    alice
        .update_shape("s1", ShapePatch::position(50.0, 60.0), 20)
        .expect("move should succeed");

    // A re-snapshot no longer contains s1 (someone deleted it while we
    // were offline).
    alice.handle_event(
        ChannelEvent::Snapshot { canvas_id: "canvas-1".into(), shapes: vec![], last_updated: 99 },
        100,
    );

    assert_eq!(
        alice.undo(110),
        Err(SyncError::HistoryStale { shape_id: "s1".to_string() })
    );
}
