//! Error taxonomy shared by the queue, store, and service layers.
//!
//! Producer- and querier-facing operations surface these directly; the flush
//! worker consumes them internally and never lets them escape.

use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;
use tonic::Status;

/// Errors raised anywhere along the ingest → queue → store → query path.
#[derive(Error, Debug)]
pub enum LogError {
    /// A record could not be encoded for the queue. Such a record is never enqueued.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The queue rejected an operation or could not be reached.
    #[error("Queue error: {0}")]
    Queue(String),

    /// The store rejected a write or read, or could not be reached.
    #[error("Store error: {0}")]
    Store(String),

    /// A filter could not be turned into a query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// An inbound record could not be decoded.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The operation did not finish before its deadline.
    #[error("Deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl LogError {
    pub fn queue(e: impl Display) -> Self {
        LogError::Queue(e.to_string())
    }

    pub fn store(e: impl Display) -> Self {
        LogError::Store(e.to_string())
    }

    pub fn invalid_query(e: impl Display) -> Self {
        LogError::InvalidQuery(e.to_string())
    }
}

impl From<LogError> for Status {
    fn from(err: LogError) -> Self {
        match err {
            LogError::InvalidQuery(_) | LogError::InvalidRecord(_) | LogError::Serialization(_) => {
                Status::invalid_argument(err.to_string())
            }
            LogError::Timeout(_) => Status::deadline_exceeded(err.to_string()),
            LogError::Queue(_) | LogError::Store(_) => Status::unavailable(err.to_string()),
            LogError::Arrow(_) => Status::internal(err.to_string()),
        }
    }
}

/// Runs `fut` under `deadline`, mapping expiry to [`LogError::Timeout`].
///
/// Expiry drops the inner future. A DuckDB statement still running at that
/// point is interrupted, so a write may or may not have landed.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, LogError>
where
    F: std::future::Future<Output = Result<T, LogError>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| LogError::Timeout(deadline))?
}
