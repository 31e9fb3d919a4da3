/*!
# logvault: Durable Log Ingestion and Query over Apache Arrow Flight

logvault accepts log records from many producers, buffers them in a durable
queue, moves them into an embedded DuckDB store in periodic batches, and serves
filtered queries and live tails over Arrow Flight.

## Pipeline

```text
producer ──► IngestService ──► RecordQueue ──► FlushWorker ──► LogStore ◄── QueryService ◄── reader
             (do_put, submit)   (DuckDB FIFO)    (batches,       (DuckDB,       (query, tail)
                                                  re-enqueue      keyed by id)
                                                  on failure)
```

- Ingest never waits on the store: an accepted record is durably queued.
- The store ignores duplicate ids, so re-enqueued batches are safe to retry.
- Queries are filtered by time range, level, source, service, host and a
  case-insensitive message substring, ordered newest first.
- Live tail follows the store's insertion sequence, so a record is delivered
  once regardless of flush latency.

## Usage

```rust,no_run
use logvault_core::flush::{FlushConfig, FlushWorker};
use logvault_core::ingest::IngestService;
use logvault_core::query::LogQuery;
use logvault_core::query_service::QueryService;
use logvault_core::queue::duckdb::DuckDbQueue;
use logvault_core::record::{LogEntry, LogLevel};
use logvault_core::storage::{duckdb::DuckDbStore, LogStore};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let queue = Arc::new(DuckDbQueue::new_in_memory()?);
    let store = Arc::new(DuckDbStore::new_in_memory()?);
    store.init().await?;

    let flusher = FlushWorker::new(queue.clone(), store.clone(), FlushConfig::default()).spawn();
    let ingest = IngestService::new(queue, Duration::from_secs(5));
    ingest
        .submit(LogEntry {
            level: LogLevel::Info,
            message: "boot ok".to_string(),
            source: "app.log".to_string(),
            ..Default::default()
        })
        .await?;

    let queries = QueryService::new(store, Duration::from_secs(5), Duration::from_secs(5));
    let found = queries.query(LogQuery::default()).await?;
    println!("{} records", found.count);

    flusher.stop().await;
    Ok(())
}
```

For details see:
- [`config`](crate::config) for configuration sources and options
- [`service`](crate::service) for the Flight surface
- [`storage`](crate::storage) for persistence and tail cursors
*/

pub mod config;
mod db;
pub mod error;
pub mod flush;
pub mod ingest;
pub mod query;
pub mod query_service;
pub mod queue;
pub mod record;
pub mod service;
pub mod storage;

pub use error::LogError;
pub use query::LogQuery;
pub use record::{LogEntry, LogLevel, LogRecord};
pub use service::{LogFlightService, ServiceRole};
