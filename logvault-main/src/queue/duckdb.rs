//! DuckDB-backed record queue.
//!
//! Pending records live in a table keyed by a monotonically increasing
//! sequence, so FIFO order survives restarts when the queue is file-backed.
//! Use `":memory:"` for a process-local queue.
//!
//! ```toml
//! [queue]
//! path = "queue.duckdb"   # or ":memory:"
//! db = 0                  # logical queue index, selects table log_queue_0
//! ```

use chrono::Utc;
use duckdb::{params, Config, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::{run_blocking, SharedConnection};
use crate::error::LogError;
use crate::queue::{DequeuedBatch, RecordQueue};
use crate::record::LogRecord;
use async_trait::async_trait;

/// Durable FIFO queue stored in a DuckDB table.
#[derive(Clone)]
pub struct DuckDbQueue {
    conn: SharedConnection,
    table: String,
}

impl DuckDbQueue {
    /// Opens (or creates) the queue table for logical index `db` in the database at `path`.
    pub fn open(path: &str, db: u32) -> Result<Self, LogError> {
        let conn = Connection::open_with_flags(path, Config::default()).map_err(LogError::queue)?;
        let table = format!("log_queue_{}", db);

        conn.execute_batch(&format!(
            r#"
            CREATE SEQUENCE IF NOT EXISTS {table}_seq START 1;

            CREATE TABLE IF NOT EXISTS {table} (
                seq BIGINT PRIMARY KEY DEFAULT nextval('{table}_seq'),
                payload VARCHAR NOT NULL,
                enqueued_at BIGINT NOT NULL
            );
            "#,
            table = table
        ))
        .map_err(|e| LogError::Queue(format!("Failed to create queue table: {}", e)))?;

        debug!("Opened queue table {} at {}", table, path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table,
        })
    }

    /// Creates a queue in a private in-memory database.
    pub fn new_in_memory() -> Result<Self, LogError> {
        Self::open(":memory:", 0)
    }

    /// Appends an already-encoded payload without validating it.
    #[cfg(test)]
    pub(crate) async fn push_raw(&self, payload: &str) -> Result<(), LogError> {
        self.insert_payload(payload.to_string()).await
    }

    async fn insert_payload(&self, payload: String) -> Result<(), LogError> {
        let sql = format!("INSERT INTO {} (payload, enqueued_at) VALUES (?, ?)", self.table);
        run_blocking(&self.conn, LogError::Queue, move |conn| {
            conn.execute(&sql, params![payload, Utc::now().timestamp_micros()])
                .map_err(|e| LogError::Queue(format!("Failed to enqueue record: {}", e)))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl RecordQueue for DuckDbQueue {
    async fn enqueue(&self, record: &LogRecord) -> Result<(), LogError> {
        let payload = serde_json::to_string(record)?;
        self.insert_payload(payload).await
    }

    async fn dequeue_batch(&self, max_count: usize) -> Result<DequeuedBatch, LogError> {
        if max_count == 0 {
            return Ok(DequeuedBatch::default());
        }

        let select = format!("SELECT seq, payload FROM {} ORDER BY seq ASC LIMIT ?", self.table);
        let delete = format!("DELETE FROM {} WHERE seq <= ?", self.table);
        let rows = run_blocking(&self.conn, LogError::Queue, move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| LogError::Queue(format!("Failed to begin transaction: {}", e)))?;

            let mut rows: Vec<(i64, String)> = Vec::new();
            {
                let mut stmt = tx.prepare(&select).map_err(LogError::queue)?;
                let mut result = stmt
                    .query(params![max_count as i64])
                    .map_err(LogError::queue)?;
                while let Some(row) = result.next().map_err(LogError::queue)? {
                    rows.push((
                        row.get(0).map_err(LogError::queue)?,
                        row.get(1).map_err(LogError::queue)?,
                    ));
                }
            }

            // The selected rows are exactly the oldest ones, so everything up to
            // the last selected sequence number goes.
            if let Some((last_seq, _)) = rows.last() {
                tx.execute(&delete, params![last_seq])
                    .map_err(|e| LogError::Queue(format!("Failed to remove dequeued rows: {}", e)))?;
            }

            tx.commit()
                .map_err(|e| LogError::Queue(format!("Failed to commit dequeue: {}", e)))?;
            Ok(rows)
        })
        .await?;

        let mut batch = DequeuedBatch {
            records: Vec::with_capacity(rows.len()),
            malformed: 0,
        };
        for (seq, payload) in rows {
            match serde_json::from_str::<LogRecord>(&payload) {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    warn!("Dropping malformed queue entry {}: {}", seq, e);
                    batch.malformed += 1;
                }
            }
        }

        Ok(batch)
    }

    async fn len(&self) -> Result<u64, LogError> {
        let sql = format!("SELECT count(*) FROM {}", self.table);
        let count: i64 = run_blocking(&self.conn, LogError::Queue, move |conn| {
            conn.query_row(&sql, params![], |row| row.get(0))
                .map_err(LogError::queue)
        })
        .await?;
        Ok(count as u64)
    }
}
