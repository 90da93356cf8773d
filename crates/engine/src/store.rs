// In-memory shape store: the client's materialized view of one canvas.
//
// Mutations are synchronous against the local copy and never block;
// propagation and durability belong to the sync channel and the relay.
// Container order is meaningless — z-order is an explicit shape field.

use std::collections::HashMap;

use easel_common::types::Shape;

#[derive(Debug, Clone, Default)]
pub struct ShapeStore {
    shapes: HashMap<String, Shape>,
}

impl ShapeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Shape> {
        self.shapes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Shape> {
        self.shapes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shapes.contains_key(id)
    }

    pub fn upsert(&mut self, shape: Shape) {
        self.shapes.insert(shape.id.clone(), shape);
    }

    pub fn remove(&mut self, id: &str) -> Option<Shape> {
        self.shapes.remove(id)
    }

    /// All shapes, cloned (snapshot material).
    pub fn list(&self) -> Vec<Shape> {
        self.shapes.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.values()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Replace the full shape set atomically (initial join or
    /// re-snapshot after a reconnection gap).
    pub fn apply_snapshot(&mut self, shapes: Vec<Shape>) {
        self.shapes = shapes.into_iter().map(|shape| (shape.id.clone(), shape)).collect();
    }
}
