//! Producer-facing ingestion.
//!
//! Entries are completed (id, timestamp) and enqueued. Ingest never waits on
//! the store; a successful call only means the record is durably queued.

use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{with_deadline, LogError};
use crate::queue::RecordQueue;
use crate::record::{LogEntry, LogRecord};

/// Reply to a single submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub accepted: bool,
    pub message: String,
    /// Identifier of the queued record when accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Aggregate reply to a streamed submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub processed_count: u64,
    #[serde(default)]
    pub rejected_count: u64,
}

#[derive(Clone)]
pub struct IngestService {
    queue: Arc<dyn RecordQueue>,
    timeout: Duration,
}

impl IngestService {
    pub fn new(queue: Arc<dyn RecordQueue>, timeout: Duration) -> Self {
        Self { queue, timeout }
    }

    /// Completes an entry: a fresh v4 UUID when `id` is absent or empty, the
    /// current time when `timestamp` is absent.
    pub fn prepare(entry: LogEntry) -> LogRecord {
        LogRecord::from_entry(entry, || Uuid::new_v4().to_string(), Utc::now)
    }

    /// Enqueues one entry, returning the record as queued.
    pub async fn submit(&self, entry: LogEntry) -> Result<LogRecord, LogError> {
        let record = Self::prepare(entry);
        with_deadline(self.timeout, self.queue.enqueue(&record)).await?;
        debug!("Queued record {}", record.id);
        Ok(record)
    }

    /// Enqueues one entry and reports the result as an [`Ack`].
    pub async fn submit_one(&self, entry: LogEntry) -> Ack {
        match self.submit(entry).await {
            Ok(record) => Ack {
                accepted: true,
                message: "Log received successfully".to_string(),
                id: Some(record.id),
            },
            Err(e) => {
                warn!("Rejected log entry: {}", e);
                Ack {
                    accepted: false,
                    message: format!("failed to enqueue log: {}", e),
                    id: None,
                }
            }
        }
    }

    /// Enqueues every entry of `entries`, continuing past individual failures.
    ///
    /// An `Err` item means the inbound sequence itself broke; it ends the
    /// stream and the summary covers what arrived before it.
    pub async fn submit_stream<S>(&self, entries: S) -> IngestSummary
    where
        S: Stream<Item = Result<LogEntry, LogError>> + Send,
    {
        futures::pin_mut!(entries);
        let mut summary = IngestSummary::default();

        while let Some(item) = entries.next().await {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Inbound log stream ended early: {}", e);
                    break;
                }
            };

            match self.submit(entry).await {
                Ok(_) => summary.processed_count += 1,
                Err(e) => {
                    warn!("Failed to enqueue log: {}", e);
                    summary.rejected_count += 1;
                }
            }
        }

        info!(
            "Processed {} logs from stream ({} rejected)",
            summary.processed_count, summary.rejected_count
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::duckdb::DuckDbQueue;
    use crate::queue::MockRecordQueue;
    use crate::record::LogLevel;
    use chrono::{SubsecRound, TimeZone};
    use futures::stream;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            level: LogLevel::Info,
            message: message.to_string(),
            source: "app.log".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_prepare_assigns_uuid_and_timestamp() {
        let before = Utc::now().trunc_subsecs(6);
        let record = IngestService::prepare(entry("boot ok"));
        assert!(Uuid::parse_str(&record.id).is_ok());
        assert!(record.timestamp >= before);
        assert_eq!(record.timestamp, record.timestamp.trunc_subsecs(6));
        assert_eq!(record.message, "boot ok");
    }

    #[test]
    fn test_prepare_keeps_supplied_identity() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = IngestService::prepare(LogEntry {
            id: Some("mine".to_string()),
            timestamp: Some(ts),
            ..entry("x")
        });
        assert_eq!(record.id, "mine");
        assert_eq!(record.timestamp, ts);
    }

    #[tokio::test]
    async fn test_submit_one_enqueues() {
        let queue = Arc::new(DuckDbQueue::new_in_memory().unwrap());
        let ingest = IngestService::new(queue.clone(), Duration::from_secs(1));

        let ack = ingest.submit_one(entry("boot ok")).await;
        assert!(ack.accepted);
        assert_eq!(ack.message, "Log received successfully");

        let batch = queue.dequeue_batch(10).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(Some(batch.records[0].id.clone()), ack.id);
    }

    #[tokio::test]
    async fn test_submit_one_reports_queue_failure() {
        let mut queue = MockRecordQueue::new();
        queue
            .expect_enqueue()
            .returning(|_| Err(LogError::queue("connection refused")));
        let ingest = IngestService::new(Arc::new(queue), Duration::from_secs(1));

        let ack = ingest.submit_one(entry("boot ok")).await;
        assert!(!ack.accepted);
        assert!(ack.message.contains("connection refused"));
        assert_eq!(ack.id, None);
    }

    #[tokio::test]
    async fn test_stream_continues_past_failures() {
        let mut queue = MockRecordQueue::new();
        queue.expect_enqueue().returning(|record| {
            if record.message == "bad" {
                Err(LogError::queue("rejected"))
            } else {
                Ok(())
            }
        });
        let ingest = IngestService::new(Arc::new(queue), Duration::from_secs(1));

        let entries = stream::iter(vec![Ok(entry("one")), Ok(entry("bad")), Ok(entry("two"))]);
        let summary = ingest.submit_stream(entries).await;
        assert_eq!(
            summary,
            IngestSummary {
                processed_count: 2,
                rejected_count: 1
            }
        );
    }

    #[tokio::test]
    async fn test_stream_stops_at_transport_error() {
        let queue = Arc::new(DuckDbQueue::new_in_memory().unwrap());
        let ingest = IngestService::new(queue.clone(), Duration::from_secs(1));

        let entries = stream::iter(vec![
            Ok(entry("one")),
            Err(LogError::InvalidRecord("truncated batch".to_string())),
            Ok(entry("never")),
        ]);
        let summary = ingest.submit_stream(entries).await;
        assert_eq!(summary.processed_count, 1);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let queue = Arc::new(DuckDbQueue::new_in_memory().unwrap());
        let ingest = IngestService::new(queue, Duration::from_secs(1));
        let summary = ingest.submit_stream(stream::empty()).await;
        assert_eq!(summary, IngestSummary::default());
    }

    #[tokio::test]
    async fn test_submit_times_out() {
        struct StalledQueue;

        #[async_trait::async_trait]
        impl RecordQueue for StalledQueue {
            async fn enqueue(&self, _record: &LogRecord) -> Result<(), LogError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
            async fn dequeue_batch(
                &self,
                _max_count: usize,
            ) -> Result<crate::queue::DequeuedBatch, LogError> {
                Ok(Default::default())
            }
            async fn len(&self) -> Result<u64, LogError> {
                Ok(0)
            }
        }

        let ingest = IngestService::new(Arc::new(StalledQueue), Duration::from_millis(20));
        let result = ingest.submit(entry("slow")).await;
        assert!(matches!(result, Err(LogError::Timeout(_))));
    }
}
