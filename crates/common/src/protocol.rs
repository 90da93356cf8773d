// WebSocket message types for the easel-sync.v1 protocol.

use serde::{Deserialize, Serialize};

use crate::mutation::ShapeMutation;
use crate::presence::PresenceRecord;
use crate::types::{Shape, TimestampMs};

pub const CURRENT_PROTOCOL_VERSION: &str = "easel-sync.v1";

/// All message types in the easel-sync.v1 WebSocket protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client -> Server: initial handshake. Must be the first frame.
    Hello {
        protocol: String,
        user_id: String,
        display_name: String,
    },

    /// Server -> Client: handshake acknowledgement.
    HelloAck {
        server_time: TimestampMs,
    },

    /// Client -> Server: join a canvas topic. The server answers with a
    /// snapshot and the currently live presence records.
    Subscribe {
        canvas_id: String,
    },

    /// Client -> Server: request a fresh snapshot (reconnection gap).
    SnapshotRequest {
        canvas_id: String,
    },

    /// Server -> Client: full shape set for a canvas.
    Snapshot {
        canvas_id: String,
        shapes: Vec<Shape>,
        last_updated: TimestampMs,
    },

    /// Bidirectional: a single shape mutation.
    Mutation {
        canvas_id: String,
        mutation: ShapeMutation,
    },

    /// Bidirectional: a presence/cursor update. Fire-and-forget, last
    /// write wins per user.
    Presence {
        canvas_id: String,
        record: PresenceRecord,
    },

    /// Bidirectional: a user left the canvas (explicit on clean
    /// disconnect, inferred via heartbeat expiry otherwise).
    PresenceLeave {
        canvas_id: String,
        user_id: String,
    },

    /// Server -> Client: error.
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

/// Encode a message as a JSON text frame payload.
pub fn encode_message(message: &WsMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Decode a JSON text frame payload.
pub fn decode_message(raw: &str) -> Result<WsMessage, serde_json::Error> {
    serde_json::from_str(raw)
}
