// The shape mutation wire contract, independent of transport:
//
//   { kind: "create"|"update"|"delete", shapeId, fields?, userId, timestamp }
//
// `fields` is the full shape for a create and a sparse patch for an
// update.

use serde::{Deserialize, Serialize};

use crate::patch::ShapePatch;
use crate::types::{Shape, TimestampMs};

/// A single shape mutation as it travels between clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShapeMutation {
    #[serde(rename_all = "camelCase")]
    Create { shape_id: String, fields: Shape, user_id: String, timestamp: TimestampMs },
    #[serde(rename_all = "camelCase")]
    Update { shape_id: String, fields: ShapePatch, user_id: String, timestamp: TimestampMs },
    #[serde(rename_all = "camelCase")]
    Delete { shape_id: String, user_id: String, timestamp: TimestampMs },
}

impl ShapeMutation {
    pub fn shape_id(&self) -> &str {
        match self {
            Self::Create { shape_id, .. }
            | Self::Update { shape_id, .. }
            | Self::Delete { shape_id, .. } => shape_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::Create { user_id, .. }
            | Self::Update { user_id, .. }
            | Self::Delete { user_id, .. } => user_id,
        }
    }

    pub fn timestamp(&self) -> TimestampMs {
        match self {
            Self::Create { timestamp, .. }
            | Self::Update { timestamp, .. }
            | Self::Delete { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}
