// Partial shape updates.
//
// A `ShapePatch` carries only the fields an edit actually touched; unset
// slots leave the shape untouched. Lock transitions ride along in the
// same patch so grant/release/expiry propagate through the ordinary
// update path.

use serde::{Deserialize, Serialize};

use crate::types::{Shadow, Shape, TimestampMs};

/// A lock transition carried inside a shape update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LockPatch {
    /// Take (or refresh) the lock for `by` at time `at`.
    #[serde(rename_all = "camelCase")]
    Acquire { by: String, at: TimestampMs },
    /// Clear the lock.
    Release,
}

/// A partial update to a shape. Every slot is optional; only set slots
/// are written by [`ShapePatch::apply_to`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ShapePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow: Option<Shadow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sides: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockPatch>,
}

impl ShapePatch {
    /// A patch that only moves a shape.
    pub fn position(x: f64, y: f64) -> Self {
        Self { x: Some(x), y: Some(y), ..Default::default() }
    }

    /// A patch carrying only a lock transition.
    pub fn lock_transition(lock: LockPatch) -> Self {
        Self { lock: Some(lock), ..Default::default() }
    }

    /// Whether any content field (anything but the lock slot) is set.
    pub fn touches_content(&self) -> bool {
        self.x.is_some()
            || self.y.is_some()
            || self.width.is_some()
            || self.height.is_some()
            || self.rotation.is_some()
            || self.scale_x.is_some()
            || self.scale_y.is_some()
            || self.fill.is_some()
            || self.stroke.is_some()
            || self.stroke_width.is_some()
            || self.opacity.is_some()
            || self.shadow.is_some()
            || self.z_index.is_some()
            || self.text.is_some()
            || self.font_size.is_some()
            || self.font_family.is_some()
            || self.points.is_some()
            || self.sides.is_some()
            || self.data.is_some()
            || self.src.is_some()
    }

    /// Whether the patch sets nothing at all.
    pub fn is_empty(&self) -> bool {
        !self.touches_content() && self.lock.is_none()
    }

    /// Write every set slot into `shape`. Sync attribution fields are the
    /// caller's responsibility.
    pub fn apply_to(&self, shape: &mut Shape) {
        if let Some(x) = self.x {
            shape.x = x;
        }
        if let Some(y) = self.y {
            shape.y = y;
        }
        if let Some(width) = self.width {
            shape.width = width;
        }
        if let Some(height) = self.height {
            shape.height = height;
        }
        if let Some(rotation) = self.rotation {
            shape.rotation = rotation;
        }
        if let Some(scale_x) = self.scale_x {
            shape.scale_x = scale_x;
        }
        if let Some(scale_y) = self.scale_y {
            shape.scale_y = scale_y;
        }
        if let Some(fill) = &self.fill {
            shape.fill = fill.clone();
        }
        if let Some(stroke) = &self.stroke {
            shape.stroke = Some(stroke.clone());
        }
        if let Some(stroke_width) = self.stroke_width {
            shape.stroke_width = stroke_width;
        }
        if let Some(opacity) = self.opacity {
            shape.opacity = opacity;
        }
        if let Some(shadow) = &self.shadow {
            shape.shadow = Some(shadow.clone());
        }
        if let Some(z_index) = self.z_index {
            shape.z_index = z_index;
        }
        if let Some(text) = &self.text {
            shape.text = Some(text.clone());
        }
        if let Some(font_size) = self.font_size {
            shape.font_size = Some(font_size);
        }
        if let Some(font_family) = &self.font_family {
            shape.font_family = Some(font_family.clone());
        }
        if let Some(points) = self.points {
            shape.points = Some(points);
        }
        if let Some(sides) = self.sides {
            shape.sides = Some(sides);
        }
        if let Some(data) = &self.data {
            shape.data = Some(data.clone());
        }
        if let Some(src) = &self.src {
            shape.src = Some(src.clone());
        }
        match &self.lock {
            Some(LockPatch::Acquire { by, at }) => {
                shape.locked_by = Some(by.clone());
                shape.locked_at = Some(*at);
            }
            Some(LockPatch::Release) => {
                shape.locked_by = None;
                shape.locked_at = None;
            }
            None => {}
        }
    }

    /// Capture the prior values of exactly the content slots this patch
    /// sets — the inverse for undo.
    ///
    /// Lock transitions have no inverse: undo never re-acquires or
    /// re-releases a lock on the user's behalf.
    pub fn inverse_against(&self, shape: &Shape) -> ShapePatch {
        ShapePatch {
            x: self.x.map(|_| shape.x),
            y: self.y.map(|_| shape.y),
            width: self.width.map(|_| shape.width),
            height: self.height.map(|_| shape.height),
            rotation: self.rotation.map(|_| shape.rotation),
            scale_x: self.scale_x.map(|_| shape.scale_x),
            scale_y: self.scale_y.map(|_| shape.scale_y),
            fill: self.fill.as_ref().map(|_| shape.fill.clone()),
            stroke: self.stroke.as_ref().and_then(|_| shape.stroke.clone()),
            stroke_width: self.stroke_width.map(|_| shape.stroke_width),
            opacity: self.opacity.map(|_| shape.opacity),
            shadow: self.shadow.as_ref().and_then(|_| shape.shadow.clone()),
            z_index: self.z_index.map(|_| shape.z_index),
            text: self.text.as_ref().and_then(|_| shape.text.clone()),
            font_size: self.font_size.and_then(|_| shape.font_size),
            font_family: self.font_family.as_ref().and_then(|_| shape.font_family.clone()),
            points: self.points.and_then(|_| shape.points),
            sides: self.sides.and_then(|_| shape.sides),
            data: self.data.as_ref().and_then(|_| shape.data.clone()),
            src: self.src.as_ref().and_then(|_| shape.src.clone()),
            lock: None,
        }
    }

    /// Whether both patches write at least one common content field.
    /// Lock transitions are not edits and never intersect.
    pub fn intersects(&self, other: &ShapePatch) -> bool {
        (self.x.is_some() && other.x.is_some())
            || (self.y.is_some() && other.y.is_some())
            || (self.width.is_some() && other.width.is_some())
            || (self.height.is_some() && other.height.is_some())
            || (self.rotation.is_some() && other.rotation.is_some())
            || (self.scale_x.is_some() && other.scale_x.is_some())
            || (self.scale_y.is_some() && other.scale_y.is_some())
            || (self.fill.is_some() && other.fill.is_some())
            || (self.stroke.is_some() && other.stroke.is_some())
            || (self.stroke_width.is_some() && other.stroke_width.is_some())
            || (self.opacity.is_some() && other.opacity.is_some())
            || (self.shadow.is_some() && other.shadow.is_some())
            || (self.z_index.is_some() && other.z_index.is_some())
            || (self.text.is_some() && other.text.is_some())
            || (self.font_size.is_some() && other.font_size.is_some())
            || (self.font_family.is_some() && other.font_family.is_some())
            || (self.points.is_some() && other.points.is_some())
            || (self.sides.is_some() && other.sides.is_some())
            || (self.data.is_some() && other.data.is_some())
            || (self.src.is_some() && other.src.is_some())
    }
}
