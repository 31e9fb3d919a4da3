use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::{Action, FlightClient, Ticket};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use logvault_core::ingest::{Ack, IngestSummary};
use logvault_core::query_service::QueryResult;
use logvault_core::record::{create_entry_batch, decode_record_batch};
use logvault_core::service::{LogTicket, ACTION_QUERY, ACTION_SUBMIT};
use logvault_core::{LogEntry, LogQuery};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::config::{endpoint_uri, ShipSettings};
use crate::error::ShipError;
use crate::shipper::LogSink;

/// Entries per record batch on a `do_put` stream.
const PUT_BATCH_ROWS: usize = 100;

/// [`LogSink`] backed by the logvault Arrow Flight listeners.
///
/// Submissions go to the ingest listener; queries and tails go to the query
/// listener. Channels are cloned per call.
#[derive(Clone)]
pub struct FlightSink {
    ingest: Channel,
    query: Channel,
}

impl FlightSink {
    pub fn new(ingest: Channel, query: Channel) -> Self {
        Self { ingest, query }
    }

    /// Connects to both listeners named in `settings`.
    pub async fn connect(settings: &ShipSettings) -> Result<Self, ShipError> {
        let ingest = Self::channel(&settings.ingest_addr, settings.timeout()).await?;
        let query = Self::channel(&settings.query_addr, settings.timeout()).await?;
        Ok(Self::new(ingest, query))
    }

    async fn channel(addr: &str, timeout: Duration) -> Result<Channel, ShipError> {
        let channel = Endpoint::from_shared(endpoint_uri(addr))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect()
            .await?;
        debug!("Connected to {}", addr);
        Ok(channel)
    }

    async fn action(channel: &Channel, name: &'static str, body: Vec<u8>) -> Result<Bytes, ShipError> {
        let mut client = FlightClient::new(channel.clone());
        let mut replies = client
            .do_action(Action {
                r#type: name.to_string(),
                body: body.into(),
            })
            .await?;
        replies.try_next().await?.ok_or(ShipError::EmptyReply(name))
    }

    /// Follows records matching `query` as they are stored.
    pub async fn tail(&self, query: LogQuery) -> Result<BoxStream<'static, Result<Vec<LogEntry>, ShipError>>, ShipError> {
        let ticket = LogTicket::tail(query).to_bytes()?;
        let mut client = FlightClient::new(self.query.clone());
        let batches = client.do_get(Ticket { ticket }).await?;

        Ok(batches
            .map(|batch| -> Result<Vec<LogEntry>, ShipError> { Ok(decode_record_batch(&batch?)?) })
            .boxed())
    }
}

#[async_trait]
impl LogSink for FlightSink {
    async fn submit(&self, entry: LogEntry) -> Result<Ack, ShipError> {
        let body = serde_json::to_vec(&entry)?;
        let reply = Self::action(&self.ingest, ACTION_SUBMIT, body).await?;
        Ok(serde_json::from_slice(&reply)?)
    }

    async fn submit_stream(&self, entries: BoxStream<'static, LogEntry>) -> Result<IngestSummary, ShipError> {
        let batches = entries.chunks(PUT_BATCH_ROWS).map(|chunk| {
            create_entry_batch(&chunk).map_err(|e| FlightError::ExternalError(Box::new(e)))
        });
        let data = FlightDataEncoderBuilder::new().build(batches);

        let mut client = FlightClient::new(self.ingest.clone());
        let results: Vec<_> = client.do_put(data).await?.try_collect().await?;
        let last = results.last().ok_or(ShipError::EmptyReply("do_put"))?;
        Ok(serde_json::from_slice(&last.app_metadata)?)
    }

    async fn query(&self, query: LogQuery) -> Result<QueryResult, ShipError> {
        let body = serde_json::to_vec(&query)?;
        let reply = Self::action(&self.query, ACTION_QUERY, body).await?;
        Ok(serde_json::from_slice(&reply)?)
    }
}
