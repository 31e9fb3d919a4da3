//! Durable, queryable persistence for log records.
//!
//! The store is keyed by record `id`, so writing the same record twice leaves
//! a single row. Each inserted row also receives a store-assigned,
//! monotonically increasing sequence number. Tail readers use it as a cursor:
//! a row becomes visible to a tail poll once, in insertion order, no matter
//! how its `timestamp` relates to the wall clock.
//!
//! - `duckdb`: embedded DuckDB implementation, file-backed or in-memory

pub mod duckdb;

use async_trait::async_trait;

use crate::error::LogError;
use crate::query::LogQuery;
use crate::record::LogRecord;

#[cfg(test)]
use mockall::automock;

/// Rows matched by a tail poll together with the advanced cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TailBatch {
    /// Matching rows inserted after the previous cursor, most recent first.
    pub records: Vec<LogRecord>,
    /// Highest sequence number examined. Pass it as `after` on the next poll.
    pub watermark: i64,
}

/// Storage contract used by the flush worker (writes) and the query service (reads).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Creates tables and indexes if they do not exist.
    async fn init(&self) -> Result<(), LogError>;

    /// Inserts a batch atomically, ignoring ids that are already stored.
    ///
    /// Returns the number of rows actually inserted. Empty input is a no-op.
    async fn store_batch(&self, records: &[LogRecord]) -> Result<usize, LogError>;

    /// Returns rows matching `query`, most recent first, paginated after ordering.
    async fn query_records(&self, query: &LogQuery) -> Result<Vec<LogRecord>, LogError>;

    /// Highest sequence number assigned so far, or 0 for an empty store.
    async fn watermark(&self) -> Result<i64, LogError>;

    /// Returns every row matching `query` whose sequence number is above `after`.
    ///
    /// Pagination in `query` is ignored.
    async fn query_since(&self, query: &LogQuery, after: i64) -> Result<TailBatch, LogError>;
}
