//! Arrow Flight transport for ingestion, queries, live tail and health.
//!
//! | Flight method | Operation |
//! |---|---|
//! | `do_put` | submit-stream: record batches in [`log_schema`], one JSON [`IngestSummary`] back |
//! | `do_action("submit")` | submit-one: JSON [`LogEntry`] → JSON [`Ack`] |
//! | `do_action("query")` | JSON [`LogQuery`] → JSON [`QueryResult`] |
//! | `do_action("health")` | `{"status":"ok","time":…}` |
//! | `do_get` | query or live tail, streamed as record batches |
//!
//! A listener serves one [`ServiceRole`]; calls outside it are refused with
//! `permission_denied`.

use crate::error::LogError;
use crate::ingest::{Ack, IngestService, IngestSummary};
use crate::query::LogQuery;
use crate::query_service::{QueryResult, QueryService};
use crate::record::{create_record_batch, decode_record_batch, log_schema, LogEntry};
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::{
    flight_service_server::FlightService, Action, ActionType, Criteria, Empty, FlightData,
    FlightDescriptor, FlightInfo, HandshakeRequest, HandshakeResponse, PollInfo, PutResult,
    SchemaAsIpc, SchemaResult, Ticket,
};
use arrow_ipc::writer::IpcWriteOptions;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use futures::{stream, Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

pub const ACTION_SUBMIT: &str = "submit";
pub const ACTION_QUERY: &str = "query";
pub const ACTION_HEALTH: &str = "health";

/// Which half of the API a listener exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    Ingest,
    Query,
    All,
}

impl ServiceRole {
    fn ingest(&self) -> bool {
        matches!(self, ServiceRole::Ingest | ServiceRole::All)
    }

    fn query(&self) -> bool {
        matches!(self, ServiceRole::Query | ServiceRole::All)
    }
}

/// What a `do_get` ticket asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketKind {
    Query,
    Tail,
}

/// Decoded `do_get` ticket.
///
/// Encoded either as JSON (`{"kind":"tail","query":{…}}`) or as discrete
/// parameters (`kind=tail&level=ERROR&search=boot`). `kind` defaults to `query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTicket {
    #[serde(default = "default_kind")]
    pub kind: TicketKind,
    #[serde(default)]
    pub query: LogQuery,
}

fn default_kind() -> TicketKind {
    TicketKind::Query
}

impl LogTicket {
    pub fn query(query: LogQuery) -> Self {
        Self {
            kind: TicketKind::Query,
            query,
        }
    }

    pub fn tail(query: LogQuery) -> Self {
        Self {
            kind: TicketKind::Tail,
            query,
        }
    }

    pub fn parse(ticket: &[u8]) -> Result<Self, LogError> {
        let text = std::str::from_utf8(ticket)
            .map_err(|e| LogError::invalid_query(format!("Ticket is not UTF-8: {}", e)))?
            .trim();

        if text.starts_with('{') {
            return serde_json::from_str(text)
                .map_err(|e| LogError::invalid_query(format!("Invalid ticket: {}", e)));
        }

        let mut kind = TicketKind::Query;
        let mut params = Vec::new();
        for pair in text.trim_start_matches('?').split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match (key, value) {
                ("kind", "query") => kind = TicketKind::Query,
                ("kind", "tail") => kind = TicketKind::Tail,
                ("kind", other) => {
                    return Err(LogError::invalid_query(format!("Unknown ticket kind '{}'", other)))
                }
                _ => params.push((key, value)),
            }
        }

        Ok(Self {
            kind,
            query: LogQuery::from_params(params)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes, LogError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Body of the `health` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub time: String,
}

type FlightStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

pub struct LogFlightService {
    role: ServiceRole,
    ingest: IngestService,
    queries: QueryService,
}

impl LogFlightService {
    pub fn new(role: ServiceRole, ingest: IngestService, queries: QueryService) -> Self {
        Self {
            role,
            ingest,
            queries,
        }
    }

    fn require_ingest(&self, op: &str) -> Result<(), Status> {
        if self.role.ingest() {
            Ok(())
        } else {
            Err(Status::permission_denied(format!("{} is not served on this listener", op)))
        }
    }

    fn require_query(&self, op: &str) -> Result<(), Status> {
        if self.role.query() {
            Ok(())
        } else {
            Err(Status::permission_denied(format!("{} is not served on this listener", op)))
        }
    }

    fn action_result<T: Serialize>(value: &T) -> Result<Response<FlightStream<arrow_flight::Result>>, Status> {
        let body = serde_json::to_vec(value).map_err(LogError::from)?;
        let result = arrow_flight::Result { body: body.into() };
        Ok(Response::new(Box::pin(stream::once(async move { Ok(result) }))))
    }

    fn encode(batches: impl Stream<Item = Result<arrow_array::RecordBatch, FlightError>> + Send + 'static) -> FlightStream<FlightData> {
        let encoded = FlightDataEncoderBuilder::new()
            .with_schema(Arc::new(log_schema()))
            .build(batches)
            .map_err(Status::from);
        Box::pin(encoded)
    }
}

#[tonic::async_trait]
impl FlightService for LogFlightService {
    type HandshakeStream = FlightStream<HandshakeResponse>;
    type ListFlightsStream = FlightStream<FlightInfo>;
    type DoGetStream = FlightStream<FlightData>;
    type DoPutStream = FlightStream<PutResult>;
    type DoActionStream = FlightStream<arrow_flight::Result>;
    type ListActionsStream = FlightStream<ActionType>;
    type DoExchangeStream = FlightStream<FlightData>;

    async fn get_schema(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        let schema = log_schema();
        let result: SchemaResult = SchemaAsIpc::new(&schema, &IpcWriteOptions::default())
            .try_into()
            .map_err(|e: arrow_schema::ArrowError| Status::internal(e.to_string()))?;
        Ok(Response::new(result))
    }

    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        self.require_query("do_get")?;
        let ticket = LogTicket::parse(&request.into_inner().ticket)?;

        match ticket.kind {
            TicketKind::Query => {
                let result = self.queries.query(ticket.query).await?;
                debug!("do_get returning {} records", result.count);
                let batches = if result.records.is_empty() {
                    vec![]
                } else {
                    vec![Ok(create_record_batch(&result.records)?)]
                };
                Ok(Response::new(Self::encode(stream::iter(batches))))
            }
            TicketKind::Tail => {
                info!("Opening live tail");
                let tail = self.queries.tail(ticket.query).await?;
                let batches = tail.map(|records| {
                    create_record_batch(&records).map_err(|e| FlightError::ExternalError(Box::new(e)))
                });
                Ok(Response::new(Self::encode(batches)))
            }
        }
    }

    async fn handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("handshake not implemented"))
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        Err(Status::unimplemented("list_flights not implemented"))
    }

    async fn get_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        Err(Status::unimplemented("get_flight_info not implemented"))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info not implemented"))
    }

    async fn do_put(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        self.require_ingest("do_put")?;

        let batches = FlightRecordBatchStream::new_from_flight_data(
            request.into_inner().map_err(FlightError::from),
        );
        let entries = batches.flat_map(|batch| {
            let items: Vec<Result<LogEntry, LogError>> = match batch {
                Ok(batch) => match decode_record_batch(&batch) {
                    Ok(entries) => entries.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                },
                Err(e) => vec![Err(LogError::InvalidRecord(e.to_string()))],
            };
            stream::iter(items)
        });

        let summary: IngestSummary = self.ingest.submit_stream(entries).await;
        let body = serde_json::to_vec(&summary).map_err(LogError::from)?;
        let result = PutResult {
            app_metadata: body.into(),
        };
        Ok(Response::new(Box::pin(stream::once(async move { Ok(result) }))))
    }

    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        let action = request.into_inner();

        match action.r#type.as_str() {
            ACTION_SUBMIT => {
                self.require_ingest(ACTION_SUBMIT)?;
                let entry: LogEntry = serde_json::from_slice(&action.body)
                    .map_err(|e| LogError::InvalidRecord(e.to_string()))?;
                let ack: Ack = self.ingest.submit_one(entry).await;
                Self::action_result(&ack)
            }
            ACTION_QUERY => {
                self.require_query(ACTION_QUERY)?;
                let query: LogQuery = if action.body.is_empty() {
                    LogQuery::default()
                } else {
                    serde_json::from_slice(&action.body).map_err(LogError::invalid_query)?
                };
                let result: QueryResult = self.queries.query(query).await?;
                Self::action_result(&result)
            }
            ACTION_HEALTH => Self::action_result(&Health {
                status: "ok".to_string(),
                time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            }),
            other => Err(Status::invalid_argument(format!("Unknown action type: {}", other))),
        }
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        let mut actions = Vec::new();
        if self.role.ingest() {
            actions.push(ActionType {
                r#type: ACTION_SUBMIT.to_string(),
                description: "Submit one JSON log entry".to_string(),
            });
        }
        if self.role.query() {
            actions.push(ActionType {
                r#type: ACTION_QUERY.to_string(),
                description: "Query stored logs with a JSON filter".to_string(),
            });
        }
        actions.push(ActionType {
            r#type: ACTION_HEALTH.to_string(),
            description: "Report service status and current time".to_string(),
        });

        Ok(Response::new(Box::pin(stream::iter(actions.into_iter().map(Ok)))))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange not implemented"))
    }
}
