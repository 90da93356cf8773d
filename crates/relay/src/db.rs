// SQLite persistence for canvas documents.
//
// One row per canvas: the full shape list as JSON plus a last-updated
// timestamp. Read once when a canvas is first touched, written on every
// applied mutation. Presence is deliberately never written here.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};

use easel_common::types::{Shape, TimestampMs};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS canvases (
    canvas_id     TEXT PRIMARY KEY,
    shapes        TEXT NOT NULL,
    last_updated  INTEGER NOT NULL
);
"#;

/// Canvas document store. The connection is mutex-guarded: statements
/// are short and the write rate is one row per applied mutation.
pub struct CanvasDb {
    conn: Mutex<Connection>,
}

impl CanvasDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create canvas db directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open canvas db at {}", path.display()))?;
        conn.execute_batch(MIGRATION_V1_SQL).context("failed to run canvas db migration")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory canvas db")?;
        conn.execute_batch(MIGRATION_V1_SQL).context("failed to run canvas db migration")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Persist the full document for a canvas.
    pub fn save_canvas(
        &self,
        canvas_id: &str,
        shapes: &[Shape],
        last_updated: TimestampMs,
    ) -> Result<()> {
        let json =
            serde_json::to_string(shapes).context("failed to encode shapes for persistence")?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO canvases (canvas_id, shapes, last_updated) VALUES (?1, ?2, ?3) \
             ON CONFLICT(canvas_id) DO UPDATE SET \
               shapes = excluded.shapes, \
               last_updated = excluded.last_updated",
            params![canvas_id, json, last_updated],
        )
        .context("failed to upsert canvas document")?;
        Ok(())
    }

    /// Load the persisted document for a canvas, if any.
    pub fn load_canvas(&self, canvas_id: &str) -> Result<Option<(Vec<Shape>, TimestampMs)>> {
        let conn = self.lock()?;
        let row = conn.query_row(
            "SELECT shapes, last_updated FROM canvases WHERE canvas_id = ?1",
            params![canvas_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        );

        match row {
            Ok((json, last_updated)) => {
                let shapes: Vec<Shape> =
                    serde_json::from_str(&json).context("failed to decode persisted shapes")?;
                Ok(Some((shapes, last_updated)))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(error) => Err(error).context("failed to load canvas document"),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("canvas db mutex poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::CanvasDb;
    use easel_common::types::{Shape, ShapeKind};

    fn shapes() -> Vec<Shape> {
        let mut first = Shape::new("s1", ShapeKind::Rectangle, "alice", 10);
        first.x = 5.0;
        let second = Shape::new("s2", ShapeKind::Ellipse, "bob", 20);
        vec![first, second]
    }

    #[test]
    fn save_then_load_round_trips() {
        let db = CanvasDb::open_in_memory().expect("db should open");
        db.save_canvas("c1", &shapes(), 99).expect("canvas should save");

        let (loaded, last_updated) =
            db.load_canvas("c1").expect("load should succeed").expect("canvas should exist");
        assert_eq!(last_updated, 99);
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|shape| shape.id == "s1" && shape.x == 5.0));
    }

    #[test]
    fn save_overwrites_previous_document() {
        let db = CanvasDb::open_in_memory().expect("db should open");
        db.save_canvas("c1", &shapes(), 10).expect("first save");
        db.save_canvas("c1", &shapes()[..1], 20).expect("second save");

        let (loaded, last_updated) =
            db.load_canvas("c1").expect("load should succeed").expect("canvas should exist");
        assert_eq!(loaded.len(), 1);
        assert_eq!(last_updated, 20);
    }

    #[test]
    fn load_of_unknown_canvas_is_none() {
        let db = CanvasDb::open_in_memory().expect("db should open");
        assert!(db.load_canvas("nowhere").expect("load should succeed").is_none());
    }

    #[test]
    fn documents_survive_reopen() {
        let dir = tempfile::tempdir().expect("temp dir should create");
        let path = dir.path().join("canvas.db");

        {
            let db = CanvasDb::open(&path).expect("db should open");
            db.save_canvas("c1", &shapes(), 42).expect("canvas should save");
        }

        let reopened = CanvasDb::open(&path).expect("db should reopen");
        let (loaded, last_updated) =
            reopened.load_canvas("c1").expect("load should succeed").expect("canvas should exist");
        assert_eq!(loaded.len(), 2);
        assert_eq!(last_updated, 42);
    }
}
