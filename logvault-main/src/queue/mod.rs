//! Durable FIFO buffer between ingestion and persistence.
//!
//! Producers enqueue complete [`LogRecord`]s; the flush worker drains them in
//! bounded batches. Implementations must serialize `dequeue_batch` calls so
//! two concurrent drains never return the same record.

pub mod duckdb;

use async_trait::async_trait;

use crate::error::LogError;
use crate::record::LogRecord;

#[cfg(test)]
use mockall::automock;

/// Records removed from the queue by one `dequeue_batch` call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DequeuedBatch {
    /// Decoded records, oldest first.
    pub records: Vec<LogRecord>,
    /// Entries that could not be decoded. They are removed and not returned.
    pub malformed: usize,
}

impl DequeuedBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Queue contract used by ingest (producer side) and the flush worker (consumer side).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordQueue: Send + Sync + 'static {
    /// Appends a record to the tail. A record that fails to encode is not enqueued.
    async fn enqueue(&self, record: &LogRecord) -> Result<(), LogError>;

    /// Atomically removes up to `max_count` of the oldest records.
    ///
    /// An empty queue yields an empty batch, not an error.
    async fn dequeue_batch(&self, max_count: usize) -> Result<DequeuedBatch, LogError>;

    /// Number of pending entries.
    async fn len(&self) -> Result<u64, LogError>;
}
