//! Periodic transfer of queued records into the store.
//!
//! One worker drains the queue in bounded batches on a fixed interval. A batch
//! the store rejects goes back on the queue record by record, so no producer
//! ever sees a storage failure and every drained record is retried later.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::RecordQueue;
use crate::storage::LogStore;

/// Scheduling parameters for the flush worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

/// What a single flush cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The queue had nothing to decode; the store was not touched.
    Idle,
    /// The batch was written. `count` includes records the store already held.
    Stored { count: usize, malformed: usize },
    /// The store failed; `count` records went back on the queue and `dropped`
    /// could not be re-enqueued.
    Requeued {
        count: usize,
        dropped: usize,
        malformed: usize,
    },
    /// The queue could not be read; nothing was removed.
    DequeueFailed,
}

pub struct FlushWorker {
    queue: Arc<dyn RecordQueue>,
    store: Arc<dyn LogStore>,
    config: FlushConfig,
}

impl FlushWorker {
    pub fn new(queue: Arc<dyn RecordQueue>, store: Arc<dyn LogStore>, config: FlushConfig) -> Self {
        Self {
            queue,
            store,
            config,
        }
    }

    /// Runs exactly one dequeue → store cycle. Failures are logged, never returned.
    pub async fn flush_once(&self) -> FlushOutcome {
        let batch = match self.queue.dequeue_batch(self.config.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Failed to dequeue batch: {}", e);
                return FlushOutcome::DequeueFailed;
            }
        };

        let malformed = batch.malformed;
        if batch.is_empty() {
            if malformed > 0 {
                debug!("Flush cycle drained {} malformed entries only", malformed);
            }
            return FlushOutcome::Idle;
        }

        let count = batch.records.len();
        match self.store.store_batch(&batch.records).await {
            Ok(inserted) => {
                debug!(
                    "Flushed {} records ({} new, {} malformed skipped)",
                    count, inserted, malformed
                );
                FlushOutcome::Stored { count, malformed }
            }
            Err(e) => {
                warn!("Failed to store batch of {} records, re-enqueueing: {}", count, e);

                let mut dropped = 0;
                for record in &batch.records {
                    if let Err(err) = self.queue.enqueue(record).await {
                        error!(record_id = %record.id, "Dropping record after failed re-enqueue: {}", err);
                        dropped += 1;
                    }
                }

                FlushOutcome::Requeued {
                    count: count - dropped,
                    dropped,
                    malformed,
                }
            }
        }
    }

    /// Runs cycles on the configured interval until `stop` is cancelled.
    ///
    /// Cancellation is observed only between cycles, so a cycle in progress
    /// always finishes.
    pub async fn run(self, stop: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Flush worker started (interval {:?}, batch size {})",
            self.config.interval, self.config.batch_size
        );

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush_once().await;
                }
            }
        }

        info!("Flush worker stopped");
    }

    /// Starts the worker on the runtime and returns a handle that can stop it.
    pub fn spawn(self) -> FlushHandle {
        let stop = CancellationToken::new();
        let task = tokio::spawn(self.run(stop.clone()));
        FlushHandle { stop, task }
    }
}

/// Handle to a spawned [`FlushWorker`].
pub struct FlushHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl FlushHandle {
    /// Signals the worker and waits for its current cycle to finish.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            error!("Flush worker terminated abnormally: {}", e);
        }
    }
}
