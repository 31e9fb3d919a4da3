use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::flight_service_server::FlightServiceServer;
use arrow_flight::{Action, FlightClient, FlightDescriptor, Ticket};
use futures::{stream, StreamExt, TryStreamExt};
use logvault_core::flush::{FlushConfig, FlushOutcome, FlushWorker};
use logvault_core::ingest::{Ack, IngestService, IngestSummary};
use logvault_core::query::LogQuery;
use logvault_core::query_service::{QueryResult, QueryService};
use logvault_core::queue::duckdb::DuckDbQueue;
use logvault_core::queue::RecordQueue;
use logvault_core::record::{create_entry_batch, decode_record_batch, log_schema, LogEntry, LogLevel};
use logvault_core::service::{LogFlightService, LogTicket, ServiceRole};
use logvault_core::storage::duckdb::DuckDbStore;
use logvault_core::storage::LogStore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Server};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Pipeline {
    queue: Arc<DuckDbQueue>,
    store: Arc<DuckDbStore>,
    ingest: IngestService,
    queries: QueryService,
    flusher: FlushWorker,
}

impl Pipeline {
    async fn new() -> Self {
        let queue = Arc::new(DuckDbQueue::new_in_memory().unwrap());
        let store = Arc::new(DuckDbStore::new_in_memory().unwrap());
        store.init().await.unwrap();

        Self {
            ingest: IngestService::new(queue.clone(), TIMEOUT),
            queries: QueryService::new(store.clone(), Duration::from_millis(25), TIMEOUT),
            flusher: FlushWorker::new(queue.clone(), store.clone(), FlushConfig::default()),
            queue,
            store,
        }
    }

    fn service(&self, role: ServiceRole) -> LogFlightService {
        LogFlightService::new(role, self.ingest.clone(), self.queries.clone())
    }

    async fn serve(&self, role: ServiceRole) -> FlightClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let service = FlightServiceServer::new(self.service(role));

        tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        let channel = Channel::from_shared(format!("http://{}", addr))
            .unwrap()
            .connect()
            .await
            .unwrap();
        FlightClient::new(channel)
    }
}

fn entry(level: LogLevel, message: &str) -> LogEntry {
    LogEntry {
        level,
        message: message.to_string(),
        source: "app.log".to_string(),
        service: "web-service".to_string(),
        host: "server-01".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_submit_flush_query_scenario() {
    let pipeline = Pipeline::new().await;

    let ack = pipeline.ingest.submit_one(entry(LogLevel::Info, "boot ok")).await;
    assert!(ack.accepted);
    assert_eq!(pipeline.queue.len().await.unwrap(), 1);

    assert_eq!(
        pipeline.flusher.flush_once().await,
        FlushOutcome::Stored {
            count: 1,
            malformed: 0
        }
    );
    assert_eq!(pipeline.queue.len().await.unwrap(), 0);

    let result = pipeline
        .queries
        .query(LogQuery {
            level: vec![LogLevel::Info],
            search: Some("boot".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(result.count, 1);
    let stored = &result.records[0];
    assert_eq!(Some(stored.id.clone()), ack.id);
    assert_eq!(stored.message, "boot ok");
    assert_eq!(stored.source, "app.log");
}

#[tokio::test]
async fn test_empty_flush_cycle() {
    let pipeline = Pipeline::new().await;
    assert_eq!(pipeline.flusher.flush_once().await, FlushOutcome::Idle);
    assert_eq!(pipeline.store.watermark().await.unwrap(), 0);
}

#[tokio::test]
async fn test_redelivered_record_is_stored_once() {
    let pipeline = Pipeline::new().await;
    let record = IngestService::prepare(entry(LogLevel::Warn, "disk at 91%"));

    pipeline.queue.enqueue(&record).await.unwrap();
    pipeline.queue.enqueue(&record).await.unwrap();
    pipeline.flusher.flush_once().await;

    pipeline.queue.enqueue(&record).await.unwrap();
    pipeline.flusher.flush_once().await;

    let all = pipeline.queries.query(LogQuery::default()).await.unwrap();
    assert_eq!(all.count, 1);
    assert_eq!(all.records[0], record);
}

#[tokio::test]
async fn test_flight_put_then_get() {
    let pipeline = Pipeline::new().await;
    let mut client = pipeline.serve(ServiceRole::All).await;

    let batch = create_entry_batch(&[
        entry(LogLevel::Info, "Application started successfully"),
        LogEntry {
            tags: HashMap::from([("env".to_string(), "production".to_string())]),
            ..entry(LogLevel::Error, "Database connection failed")
        },
    ])
    .unwrap();
    let input = FlightDataEncoderBuilder::new().build(stream::iter(vec![Ok(batch)]));

    let results: Vec<_> = client.do_put(input).await.unwrap().try_collect().await.unwrap();
    let summary: IngestSummary = serde_json::from_slice(&results[0].app_metadata).unwrap();
    assert_eq!(summary.processed_count, 2);
    assert_eq!(summary.rejected_count, 0);

    pipeline.flusher.flush_once().await;

    let ticket = LogTicket::query(LogQuery {
        level: vec![LogLevel::Error],
        ..Default::default()
    });
    let batches: Vec<_> = client
        .do_get(Ticket {
            ticket: ticket.to_bytes().unwrap(),
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let entries: Vec<LogEntry> = batches
        .iter()
        .flat_map(|b| decode_record_batch(b).unwrap())
        .collect();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "Database connection failed");
    assert_eq!(entries[0].tags.get("env").map(String::as_str), Some("production"));
    assert!(entries[0].id.is_some());
    assert!(entries[0].timestamp.is_some());
}

#[tokio::test]
async fn test_flight_actions() {
    let pipeline = Pipeline::new().await;
    let mut client = pipeline.serve(ServiceRole::All).await;

    let body = serde_json::to_vec(&entry(LogLevel::Warn, "High memory usage detected")).unwrap();
    let replies: Vec<_> = client
        .do_action(Action {
            r#type: "submit".to_string(),
            body: body.into(),
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let ack: Ack = serde_json::from_slice(&replies[0]).unwrap();
    assert!(ack.accepted);

    pipeline.flusher.flush_once().await;

    let replies: Vec<_> = client
        .do_action(Action {
            r#type: "query".to_string(),
            body: br#"{"search":"memory"}"#.to_vec().into(),
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let result: QueryResult = serde_json::from_slice(&replies[0]).unwrap();
    assert_eq!(result.count, 1);
    assert_eq!(result.records[0].level, LogLevel::Warn);

    let schema = client
        .get_schema(FlightDescriptor::new_path(vec!["logs".to_string()]))
        .await
        .unwrap();
    assert_eq!(schema, log_schema());
}

#[tokio::test]
async fn test_flight_tail_follows_new_records() {
    let pipeline = Pipeline::new().await;
    let mut client = pipeline.serve(ServiceRole::All).await;

    pipeline.ingest.submit(entry(LogLevel::Error, "before tail")).await.unwrap();
    pipeline.flusher.flush_once().await;

    let mut tail = client
        .do_get(Ticket {
            ticket: "kind=tail&level=ERROR".into(),
        })
        .await
        .unwrap();

    pipeline.ingest.submit(entry(LogLevel::Info, "ignored")).await.unwrap();
    pipeline.ingest.submit(entry(LogLevel::Error, "after tail")).await.unwrap();
    pipeline.flusher.flush_once().await;

    let batch = tokio::time::timeout(Duration::from_secs(5), tail.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let entries = decode_record_batch(&batch).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "after tail");
}

#[tokio::test]
async fn test_binary_metadata_survives_put_and_query() {
    let pipeline = Pipeline::new().await;
    let mut client = pipeline.serve(ServiceRole::All).await;

    let payload = vec![0x00, 0x9f, 0xff, 0xfe];
    let batch = create_entry_batch(&[LogEntry {
        metadata: Some(payload.clone()),
        ..entry(LogLevel::Info, "opaque payload")
    }])
    .unwrap();
    let input = FlightDataEncoderBuilder::new().build(stream::iter(vec![Ok(batch)]));
    let results: Vec<_> = client.do_put(input).await.unwrap().try_collect().await.unwrap();
    let summary: IngestSummary = serde_json::from_slice(&results[0].app_metadata).unwrap();
    assert_eq!(summary.processed_count, 1);

    pipeline.flusher.flush_once().await;

    let stored = pipeline.queries.query(LogQuery::default()).await.unwrap();
    assert_eq!(stored.records[0].metadata, payload);

    let batches: Vec<_> = client
        .do_get(Ticket {
            ticket: "limit=1".into(),
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let entries = decode_record_batch(&batches[0]).unwrap();
    assert_eq!(entries[0].metadata, Some(payload));
}

#[tokio::test]
async fn test_shutdown_ends_open_tail() {
    let pipeline = Pipeline::new().await;
    let shutdown = CancellationToken::new();
    let queries = pipeline.queries.clone().with_shutdown(shutdown.child_token());
    let service = LogFlightService::new(ServiceRole::Query, pipeline.ingest.clone(), queries);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = shutdown.clone();
    let server = tokio::spawn(async move {
        Server::builder()
            .add_service(FlightServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                stop.cancelled().await
            })
            .await
    });

    let channel = Channel::from_shared(format!("http://{}", addr))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = FlightClient::new(channel);
    let mut tail = client
        .do_get(Ticket {
            ticket: "kind=tail".into(),
        })
        .await
        .unwrap();

    shutdown.cancel();

    let served = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("listener drained while a tail was open")
        .unwrap();
    assert!(served.is_ok());
    let last = tokio::time::timeout(Duration::from_secs(5), tail.next()).await.unwrap();
    assert!(last.map_or(true, |item| item.is_err()));
}

#[tokio::test]
async fn test_role_split_listeners() {
    let pipeline = Pipeline::new().await;
    let mut ingest_client = pipeline.serve(ServiceRole::Ingest).await;
    let mut query_client = pipeline.serve(ServiceRole::Query).await;

    let err = ingest_client
        .do_get(Ticket {
            ticket: "limit=1".into(),
        })
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("not served on this listener"));

    let err = query_client
        .do_action(Action {
            r#type: "submit".to_string(),
            body: b"{}".to_vec().into(),
        })
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("not served on this listener"));

    let health: Vec<_> = query_client
        .do_action(Action {
            r#type: "health".to_string(),
            body: Default::default(),
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&health[0]).unwrap();
    assert_eq!(health["status"], "ok");
}
