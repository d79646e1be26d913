use chatlink_core::{CoreError, CorrelationId, QueueRecord, QueueStore, ThreadId};
use rusqlite::{params, Connection};
use std::sync::Mutex;

/// Durable offline queue on embedded SQLite. One row per pending outbound
/// operation; the record body travels as a MessagePack blob so upload
/// payload bytes round-trip without escaping. Insertion order is rowid
/// order, and re-enqueueing an id updates the row in place so the original
/// position is kept.
pub struct SqliteQueueStore {
    conn: Mutex<Connection>,
}

impl SqliteQueueStore {
    pub fn in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::with_connection(conn)
    }

    pub fn open(path: &std::path::Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, CoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS outbound_queue (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                thread_id INTEGER NOT NULL,
                queued_at_ms INTEGER NOT NULL,
                body BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outbound_queue_thread
                ON outbound_queue (thread_id);",
        )
        .map_err(storage_err)
    }

    pub fn count(&self) -> Result<u64, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM outbound_queue", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count.max(0) as u64)
    }

    pub fn contains(&self, id: &CorrelationId) -> Result<bool, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM outbound_queue WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count > 0)
    }
}

impl QueueStore for SqliteQueueStore {
    fn enqueue(&self, record: &QueueRecord) -> Result<(), CoreError> {
        let body = rmp_serde::to_vec_named(&record.body).map_err(|err| {
            CoreError::Serialization {
                message: err.to_string(),
            }
        })?;
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO outbound_queue (id, kind, thread_id, queued_at_ms, body)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                thread_id = excluded.thread_id,
                queued_at_ms = excluded.queued_at_ms,
                body = excluded.body",
            params![
                record.id.as_str(),
                record.kind().as_str(),
                record.thread().0,
                record.queued_at_ms as i64,
                body,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn dequeue(&self, id: &CorrelationId) -> Result<bool, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let removed = conn
            .execute(
                "DELETE FROM outbound_queue WHERE id = ?1",
                params![id.as_str()],
            )
            .map_err(storage_err)?;
        Ok(removed > 0)
    }

    fn list_by_thread(&self, thread: ThreadId) -> Result<Vec<QueueRecord>, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT id, queued_at_ms, body FROM outbound_queue
                 WHERE thread_id = ?1 ORDER BY rowid ASC",
            )
            .map_err(storage_err)?;
        let mut rows = stmt.query(params![thread.0]).map_err(storage_err)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(storage_err)? {
            let id: String = row.get(0).map_err(storage_err)?;
            let queued_at_ms: i64 = row.get(1).map_err(storage_err)?;
            let body: Vec<u8> = row.get(2).map_err(storage_err)?;
            let body = rmp_serde::from_slice(&body).map_err(|err| {
                log::warn!("queue row {id} holds an undecodable body: {err}");
                CoreError::Serialization {
                    message: err.to_string(),
                }
            })?;
            records.push(QueueRecord {
                id: CorrelationId::from(id),
                body,
                queued_at_ms: queued_at_ms.max(0) as u64,
            });
        }
        Ok(records)
    }
}

fn storage_err(err: rusqlite::Error) -> CoreError {
    CoreError::storage(err.to_string())
}
