//! DuckDB storage backend implementation.
//!
//! Records live in a single `logs` table keyed by `id`. The backend supports
//! in-memory and persistent databases:
//!
//! ```toml
//! [database]
//! path = "logvault.duckdb"  # or ":memory:"
//! ```
//!
//! Secondary indexes cover `timestamp`, `level`, `source`, `service` and
//! `host`. Message search is a case-insensitive containment scan; the bundled
//! engine ships without a full-text index extension.

use chrono::{DateTime, Utc};
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Config, Connection};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::db::{run_blocking, SharedConnection};
use crate::error::LogError;
use crate::query::{Column, LogQuery, QueryBuilder, SqlParam};
use crate::record::{LogLevel, LogRecord};
use crate::storage::{LogStore, TailBatch};
use async_trait::async_trait;

const SELECT_LOGS: &str =
    "SELECT id, timestamp, level, message, source, service, host, tags, metadata FROM logs";

/// DuckDB-based log store.
#[derive(Clone)]
pub struct DuckDbStore {
    conn: SharedConnection,
}

/// A row as read from the `logs` table, before conversion.
struct StoredRow {
    id: String,
    timestamp: i64,
    level: String,
    message: String,
    source: String,
    service: String,
    host: String,
    tags: Option<String>,
    metadata: Option<Vec<u8>>,
}

impl StoredRow {
    fn into_record(self) -> Result<LogRecord, LogError> {
        let timestamp = DateTime::<Utc>::from_timestamp_micros(self.timestamp).ok_or_else(|| {
            LogError::Store(format!("Row {} has out-of-range timestamp {}", self.id, self.timestamp))
        })?;
        let tags: HashMap<String, String> = match self.tags {
            Some(text) if !text.is_empty() => serde_json::from_str(&text)
                .map_err(|e| LogError::Store(format!("Row {} has invalid tags: {}", self.id, e)))?,
            _ => HashMap::new(),
        };

        Ok(LogRecord {
            id: self.id,
            timestamp,
            level: LogLevel::from(self.level),
            message: self.message,
            source: self.source,
            service: self.service,
            host: self.host,
            tags,
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

impl DuckDbStore {
    /// Opens the database at `path`. Call [`LogStore::init`] before use.
    pub fn open(path: &str) -> Result<Self, LogError> {
        let conn = Connection::open_with_flags(path, Config::default()).map_err(LogError::store)?;
        debug!("Opened log store at {}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates a store in a private in-memory database.
    pub fn new_in_memory() -> Result<Self, LogError> {
        Self::open(":memory:")
    }

    fn bind(params: Vec<SqlParam>) -> Vec<Value> {
        params
            .into_iter()
            .map(|p| match p {
                SqlParam::Int(v) => Value::BigInt(v),
                SqlParam::Text(v) => Value::Text(v),
            })
            .collect()
    }

    fn fetch(conn: &Connection, builder: &QueryBuilder) -> Result<Vec<StoredRow>, LogError> {
        let (sql, params) = builder.build();
        debug!("Executing log query: {}", sql);

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LogError::Store(format!("Failed to prepare query: {}", e)))?;
        let mut rows = stmt
            .query(params_from_iter(Self::bind(params)))
            .map_err(|e| LogError::Store(format!("Failed to execute query: {}", e)))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(LogError::store)? {
            out.push(StoredRow {
                id: row.get(0).map_err(LogError::store)?,
                timestamp: row.get(1).map_err(LogError::store)?,
                level: row.get(2).map_err(LogError::store)?,
                message: row.get(3).map_err(LogError::store)?,
                source: row.get(4).map_err(LogError::store)?,
                service: row.get(5).map_err(LogError::store)?,
                host: row.get(6).map_err(LogError::store)?,
                tags: row.get(7).map_err(LogError::store)?,
                metadata: row.get(8).map_err(LogError::store)?,
            });
        }
        Ok(out)
    }

    fn max_seq(conn: &Connection) -> Result<i64, LogError> {
        conn.query_row("SELECT coalesce(max(seq), 0) FROM logs", params![], |row| row.get(0))
            .map_err(LogError::store)
    }
}

#[async_trait]
impl LogStore for DuckDbStore {
    async fn init(&self) -> Result<(), LogError> {
        run_blocking(&self.conn, LogError::Store, |conn| {
            conn.execute_batch(
                r#"
                CREATE SEQUENCE IF NOT EXISTS logs_seq START 1;

                CREATE TABLE IF NOT EXISTS logs (
                    id VARCHAR PRIMARY KEY,
                    seq BIGINT NOT NULL DEFAULT nextval('logs_seq'),
                    timestamp BIGINT NOT NULL,
                    level VARCHAR NOT NULL,
                    message VARCHAR NOT NULL,
                    source VARCHAR NOT NULL,
                    service VARCHAR NOT NULL,
                    host VARCHAR NOT NULL,
                    tags VARCHAR,
                    metadata BLOB,
                    ingested_at BIGINT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
                CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
                CREATE INDEX IF NOT EXISTS idx_logs_source ON logs(source);
                CREATE INDEX IF NOT EXISTS idx_logs_service ON logs(service);
                CREATE INDEX IF NOT EXISTS idx_logs_host ON logs(host);
                CREATE INDEX IF NOT EXISTS idx_logs_seq ON logs(seq);
                "#,
            )
            .map_err(|e| LogError::Store(format!("Failed to create logs table: {}", e)))
        })
        .await
    }

    async fn store_batch(&self, records: &[LogRecord]) -> Result<usize, LogError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut encoded = Vec::with_capacity(records.len());
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if !seen.insert(record.id.as_str()) {
                continue;
            }
            let tags = if record.tags.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&record.tags)?)
            };
            encoded.push((record.clone(), tags));
        }

        let total = records.len();
        run_blocking(&self.conn, LogError::Store, move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| LogError::Store(format!("Failed to begin transaction: {}", e)))?;

            let ingested_at = Utc::now().timestamp_micros();
            let mut inserted = 0;
            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT INTO logs (
                            id, timestamp, level, message, source, service, host,
                            tags, metadata, ingested_at
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT (id) DO NOTHING
                        "#,
                    )
                    .map_err(|e| LogError::Store(format!("Failed to prepare statement: {}", e)))?;

                for (record, tags) in &encoded {
                    let metadata: Option<&[u8]> = if record.metadata.is_empty() {
                        None
                    } else {
                        Some(record.metadata.as_slice())
                    };
                    inserted += stmt
                        .execute(params![
                            record.id,
                            record.timestamp.timestamp_micros(),
                            record.level.as_str(),
                            record.message,
                            record.source,
                            record.service,
                            record.host,
                            tags,
                            metadata,
                            ingested_at,
                        ])
                        .map_err(|e| LogError::Store(format!("Failed to insert record {}: {}", record.id, e)))?;
                }
            }

            tx.commit()
                .map_err(|e| LogError::Store(format!("Failed to commit batch: {}", e)))?;

            debug!("Stored {} of {} records", inserted, total);
            Ok(inserted)
        })
        .await
    }

    async fn query_records(&self, query: &LogQuery) -> Result<Vec<LogRecord>, LogError> {
        let builder = QueryBuilder::for_query(SELECT_LOGS, query);
        let rows =
            run_blocking(&self.conn, LogError::Store, move |conn| Self::fetch(conn, &builder)).await?;
        rows.into_iter().map(StoredRow::into_record).collect()
    }

    async fn watermark(&self) -> Result<i64, LogError> {
        run_blocking(&self.conn, LogError::Store, |conn| Self::max_seq(conn)).await
    }

    async fn query_since(&self, query: &LogQuery, after: i64) -> Result<TailBatch, LogError> {
        let mut builder = QueryBuilder::for_query(SELECT_LOGS, query);
        let fresh = run_blocking(&self.conn, LogError::Store, move |conn| {
            let watermark = Self::max_seq(conn)?;
            if watermark <= after {
                return Ok(None);
            }
            builder
                .greater_than(Column::Seq, after)
                .at_most(Column::Seq, watermark)
                .unpaginated();
            Ok(Some((watermark, Self::fetch(conn, &builder)?)))
        })
        .await?;

        let Some((watermark, rows)) = fresh else {
            return Ok(TailBatch {
                records: Vec::new(),
                watermark: after,
            });
        };
        let records = rows
            .into_iter()
            .map(StoredRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TailBatch { records, watermark })
    }
}
