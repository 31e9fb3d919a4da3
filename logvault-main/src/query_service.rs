//! Read-side operations: filtered queries and live tail.

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{with_deadline, LogError};
use crate::query::LogQuery;
use crate::record::LogRecord;
use crate::storage::LogStore;

/// Response to a query: matching records, most recent first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub records: Vec<LogRecord>,
    pub count: usize,
}

/// Batches of newly stored records matching a tail filter. Never yields an empty batch.
pub type TailStream = BoxStream<'static, Vec<LogRecord>>;

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn LogStore>,
    tail_interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl QueryService {
    pub fn new(store: Arc<dyn LogStore>, tail_interval: Duration, timeout: Duration) -> Self {
        Self {
            store,
            tail_interval,
            timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Ends every open tail once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Runs a structured query. A filter outside the level enumeration is rejected.
    pub async fn query(&self, mut query: LogQuery) -> Result<QueryResult, LogError> {
        query.normalize()?;
        let records = with_deadline(self.timeout, self.store.query_records(&query)).await?;
        debug!("Query matched {} records", records.len());
        Ok(QueryResult {
            count: records.len(),
            records,
        })
    }

    /// Runs a query given as discrete `key=value` parameters.
    pub async fn query_params<I, K, V>(&self, params: I) -> Result<QueryResult, LogError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.query(LogQuery::from_params(params)?).await
    }

    /// Opens a live tail.
    ///
    /// The cursor starts at the store's current watermark, so only records
    /// stored after this call are delivered. Each tick yields the matching
    /// records stored since the previous tick; `limit` and `offset` are
    /// ignored. A failed poll is logged and retried on the next tick without
    /// moving the cursor. The stream ends on shutdown; dropping it ends
    /// polling.
    pub async fn tail(&self, mut query: LogQuery) -> Result<TailStream, LogError> {
        query.normalize()?;
        let start = with_deadline(self.timeout, self.store.watermark()).await?;

        let store = self.store.clone();
        let period = self.tail_interval;
        let timeout = self.timeout;
        let shutdown = self.shutdown.clone();

        let stream = async_stream::stream! {
            let mut cursor = start;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match with_deadline(timeout, store.query_since(&query, cursor)).await {
                    Ok(batch) => {
                        cursor = batch.watermark;
                        if !batch.records.is_empty() {
                            debug!("Tail delivering {} records (cursor {})", batch.records.len(), cursor);
                            yield batch.records;
                        }
                    }
                    Err(e) => warn!("Tail poll failed, retrying next tick: {}", e),
                }
            }
        };

        Ok(stream
            .take_until(async move { shutdown.cancelled().await })
            .boxed())
    }
}
