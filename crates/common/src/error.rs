// Error taxonomy for the sync core.
//
// Every kind here is recoverable and handled locally; none terminates a
// client session. Locked-object attempts surface as visual feedback,
// stale drops are diagnostics-only, channel outages queue-and-replay.

use thiserror::Error;

use crate::types::TimestampMs;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    /// Another user holds the shape's lock.
    #[error("shape is locked by {held_by}")]
    LockDenied { held_by: String },

    /// The mutation lost to a more recent conflicting change and was
    /// dropped.
    #[error("stale mutation for shape {shape_id}: current state is ({current_ts}, {current_by})")]
    StaleMutation { shape_id: String, current_ts: TimestampMs, current_by: String },

    /// The transport is down; mutations queue locally until reconnect.
    #[error("sync channel unavailable: {reason}")]
    ChannelUnavailable { reason: String },

    /// The undo/redo target was invalidated by a remote edit.
    #[error("history entry for shape {shape_id} is stale")]
    HistoryStale { shape_id: String },

    /// A local intent referenced a shape that does not exist.
    #[error("shape {shape_id} does not exist")]
    ShapeMissing { shape_id: String },

    /// A local create collided with an existing shape id.
    #[error("shape {shape_id} already exists")]
    ShapeExists { shape_id: String },
}
