// Connection registry and per-canvas authoritative shape state.
//
// The relay fans mutations out to canvas subscribers and folds them into
// the snapshot it serves to joining clients. Conflict arbitration is
// client policy — mutations are applied here in arrival order only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use easel_common::mutation::ShapeMutation;
use easel_common::protocol::WsMessage;
use easel_common::types::{Shape, TimestampMs};

/// Registry of live WebSocket connections.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionRecord>>>,
}

#[derive(Debug, Clone)]
struct ConnectionRecord {
    user_id: String,
    subscriptions: HashSet<String>,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

impl SessionRegistry {
    pub async fn register(
        &self,
        connection_id: Uuid,
        user_id: String,
        outbound: mpsc::UnboundedSender<WsMessage>,
    ) {
        let mut guard = self.connections.write().await;
        guard.insert(
            connection_id,
            ConnectionRecord { user_id, subscriptions: HashSet::new(), outbound },
        );
    }

    /// Drop a connection. Returns its user id and subscriptions for
    /// disconnect cleanup.
    pub async fn remove(&self, connection_id: Uuid) -> Option<(String, Vec<String>)> {
        let mut guard = self.connections.write().await;
        guard.remove(&connection_id).map(|record| {
            let mut subscriptions: Vec<String> = record.subscriptions.into_iter().collect();
            subscriptions.sort();
            (record.user_id, subscriptions)
        })
    }

    pub async fn track_subscription(&self, connection_id: Uuid, canvas_id: &str) -> bool {
        let mut guard = self.connections.write().await;
        match guard.get_mut(&connection_id) {
            Some(record) => {
                record.subscriptions.insert(canvas_id.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn is_subscribed(&self, connection_id: Uuid, canvas_id: &str) -> bool {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|record| record.subscriptions.contains(canvas_id))
            .unwrap_or(false)
    }

    /// Whether another live connection belongs to `user_id` (a user can
    /// hold several tabs; presence leaves only with the last one).
    pub async fn user_has_other_connections(&self, user_id: &str, excluding: Uuid) -> bool {
        self.connections
            .read()
            .await
            .iter()
            .any(|(id, record)| *id != excluding && record.user_id == user_id)
    }

    /// Send to every subscriber of a canvas. Returns the recipient count.
    pub async fn broadcast_to_subscribers(&self, canvas_id: &str, message: WsMessage) -> usize {
        self.broadcast_inner(canvas_id, message, None).await
    }

    /// Broadcast to all canvas subscribers except the sender connection.
    pub async fn broadcast_to_subscribers_excluding(
        &self,
        canvas_id: &str,
        message: WsMessage,
        exclude: Uuid,
    ) -> usize {
        self.broadcast_inner(canvas_id, message, Some(exclude)).await
    }

    async fn broadcast_inner(
        &self,
        canvas_id: &str,
        message: WsMessage,
        exclude: Option<Uuid>,
    ) -> usize {
        let recipients: Vec<mpsc::UnboundedSender<WsMessage>> = {
            let guard = self.connections.read().await;
            guard
                .iter()
                .filter(|(id, record)| {
                    Some(**id) != exclude && record.subscriptions.contains(canvas_id)
                })
                .map(|(_, record)| record.outbound.clone())
                .collect()
        };

        let mut sent = 0;
        for recipient in recipients {
            if recipient.send(message.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }
}

/// Authoritative per-canvas shape documents.
#[derive(Debug, Clone, Default)]
pub struct CanvasStore {
    canvases: Arc<RwLock<HashMap<String, CanvasDoc>>>,
}

#[derive(Debug, Clone, Default)]
struct CanvasDoc {
    shapes: HashMap<String, Shape>,
    last_updated: TimestampMs,
}

impl CanvasStore {
    /// Seed a canvas from persisted state unless it is already loaded.
    pub async fn load_if_absent(
        &self,
        canvas_id: &str,
        shapes: Vec<Shape>,
        last_updated: TimestampMs,
    ) {
        let mut guard = self.canvases.write().await;
        guard.entry(canvas_id.to_string()).or_insert_with(|| CanvasDoc {
            shapes: shapes.into_iter().map(|shape| (shape.id.clone(), shape)).collect(),
            last_updated,
        });
    }

    pub async fn is_loaded(&self, canvas_id: &str) -> bool {
        self.canvases.read().await.contains_key(canvas_id)
    }

    /// Fold a mutation into the canvas document. Returns false for a
    /// no-op (duplicate create, unknown target).
    pub async fn apply(
        &self,
        canvas_id: &str,
        mutation: &ShapeMutation,
        now: TimestampMs,
    ) -> bool {
        let mut guard = self.canvases.write().await;
        let doc = guard.entry(canvas_id.to_string()).or_default();

        let applied = match mutation {
            ShapeMutation::Create { shape_id, fields, .. } => {
                if doc.shapes.contains_key(shape_id) {
                    false
                } else {
                    doc.shapes.insert(shape_id.clone(), fields.clone());
                    true
                }
            }
            ShapeMutation::Update { shape_id, fields, user_id, timestamp } => {
                match doc.shapes.get_mut(shape_id) {
                    Some(shape) => {
                        fields.apply_to(shape);
                        shape.last_modified_by = user_id.clone();
                        shape.last_modified_at = *timestamp;
                        true
                    }
                    None => false,
                }
            }
            ShapeMutation::Delete { shape_id, .. } => doc.shapes.remove(shape_id).is_some(),
        };

        if applied {
            doc.last_updated = now;
        }
        applied
    }

    /// Snapshot served on subscribe and on explicit request.
    pub async fn snapshot(&self, canvas_id: &str) -> (Vec<Shape>, TimestampMs) {
        let guard = self.canvases.read().await;
        match guard.get(canvas_id) {
            Some(doc) => (doc.shapes.values().cloned().collect(), doc.last_updated),
            None => (Vec::new(), 0),
        }
    }
}
