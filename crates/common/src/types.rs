// Core domain types shared across all Easel crates.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unix-epoch timestamp in milliseconds.
///
/// Threaded explicitly as a `now` parameter through lock, presence, and
/// resolver code so behavior is deterministic under test.
pub type TimestampMs = i64;

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> TimestampMs {
    Utc::now().timestamp_millis()
}

/// Mint a fresh shape id.
///
/// Ids are generated by the creating client so a create never needs a
/// round trip before the shape can be referenced.
pub fn new_shape_id() -> String {
    Uuid::new_v4().to_string()
}

/// The closed set of drawable object kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Rectangle,
    Ellipse,
    Triangle,
    Text,
    Star,
    Polygon,
    Path,
    Image,
}

/// Drop shadow styling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Shadow {
    pub color: String,
    pub blur: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

/// A drawable object on a canvas.
///
/// Lock state lives in ordinary fields (`locked_by`/`locked_at`) so lock
/// transitions propagate through the same update path as any other edit.
/// Whether a shape is currently locked is always derived via
/// [`Shape::lock_holder`] — a lock past its timeout reads as free even
/// before a clearing update arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub id: String,
    pub kind: ShapeKind,

    // Geometry.
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default = "default_scale")]
    pub scale_x: f64,
    #[serde(default = "default_scale")]
    pub scale_y: f64,

    // Style.
    pub fill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default)]
    pub stroke_width: f64,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow: Option<Shadow>,
    #[serde(default)]
    pub z_index: i64,

    // Kind-specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    /// Point count for stars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    /// Side count for polygons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sides: Option<u32>,
    /// Path data for freehand paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Source URL for images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,

    // Synchronization.
    pub last_modified_by: String,
    pub last_modified_at: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<TimestampMs>,
}

fn default_scale() -> f64 {
    1.0
}

fn default_opacity() -> f64 {
    1.0
}

impl Shape {
    /// Construct a shape with neutral geometry and style defaults.
    pub fn new(
        id: impl Into<String>,
        kind: ShapeKind,
        created_by: impl Into<String>,
        now: TimestampMs,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            fill: "#000000".to_string(),
            stroke: None,
            stroke_width: 0.0,
            opacity: 1.0,
            shadow: None,
            z_index: 0,
            text: None,
            font_size: None,
            font_family: None,
            points: None,
            sides: None,
            data: None,
            src: None,
            last_modified_by: created_by.into(),
            last_modified_at: now,
            locked_by: None,
            locked_at: None,
        }
    }

    /// The user currently holding this shape's lock, if any.
    ///
    /// A lock past `lock_timeout_ms` is treated as released even when the
    /// fields have not been cleared yet.
    pub fn lock_holder(&self, now: TimestampMs, lock_timeout_ms: i64) -> Option<&str> {
        let holder = self.locked_by.as_deref()?;
        let locked_at = self.locked_at?;
        if locked_at + lock_timeout_ms > now {
            Some(holder)
        } else {
            None
        }
    }

    /// Whether the shape is locked at `now`.
    pub fn is_locked(&self, now: TimestampMs, lock_timeout_ms: i64) -> bool {
        self.lock_holder(now, lock_timeout_ms).is_some()
    }
}
