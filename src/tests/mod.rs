#[cfg(test)]
mod tests {
    use crate::config::{ShipMode, ShipSettings};
    use crate::error::ShipError;
    use crate::flight_sink::FlightSink;
    use crate::shipper::{FileLines, LineSource, LogSink, MockLineSource, MockLogSink, Shipper, StaticLines};
    use arrow_flight::flight_service_server::FlightServiceServer;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use futures::StreamExt;
    use logvault_core::flush::{FlushConfig, FlushWorker};
    use logvault_core::ingest::{Ack, IngestService, IngestSummary};
    use logvault_core::query_service::{QueryResult, QueryService};
    use logvault_core::queue::duckdb::DuckDbQueue;
    use logvault_core::service::{LogFlightService, ServiceRole};
    use logvault_core::storage::{duckdb::DuckDbStore, LogStore};
    use logvault_core::{LogEntry, LogLevel, LogQuery};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::transport::{Channel, Server};

    fn settings(mode: ShipMode) -> ShipSettings {
        ShipSettings {
            source: "app.log".to_string(),
            service: "web-service".to_string(),
            host: "server-01".to_string(),
            tags: HashMap::from([("env".to_string(), "production".to_string())]),
            mode,
            ..Default::default()
        }
    }

    fn accepted() -> Ack {
        Ack {
            accepted: true,
            message: "Log received successfully".to_string(),
            id: Some("id".to_string()),
        }
    }

    fn lines(lines: &[&str]) -> StaticLines {
        StaticLines(lines.iter().map(|l| l.to_string()).collect())
    }

    /// Collects streamed entries instead of sending them anywhere.
    #[derive(Default)]
    struct CollectingSink {
        received: Mutex<Vec<LogEntry>>,
    }

    #[async_trait]
    impl LogSink for CollectingSink {
        async fn submit(&self, entry: LogEntry) -> Result<Ack, ShipError> {
            self.received.lock().unwrap().push(entry);
            Ok(accepted())
        }

        async fn submit_stream(&self, entries: BoxStream<'static, LogEntry>) -> Result<IngestSummary, ShipError> {
            let entries: Vec<_> = entries.collect().await;
            let processed_count = entries.len() as u64;
            self.received.lock().unwrap().extend(entries);
            Ok(IngestSummary {
                processed_count,
                rejected_count: 0,
            })
        }

        async fn query(&self, _query: LogQuery) -> Result<QueryResult, ShipError> {
            Ok(QueryResult {
                records: Vec::new(),
                count: 0,
            })
        }
    }

    #[test]
    fn test_level_detection() {
        assert_eq!(Shipper::detect_level("ERROR disk full"), (LogLevel::Error, "disk full"));
        assert_eq!(Shipper::detect_level("[warn] cache cold"), (LogLevel::Warn, "cache cold"));
        assert_eq!(Shipper::detect_level("Warning: slow query"), (LogLevel::Warn, "slow query"));
        assert_eq!(Shipper::detect_level("  debug:  tick"), (LogLevel::Debug, "tick"));
        assert_eq!(Shipper::detect_level("user logged in"), (LogLevel::Info, "user logged in"));
        assert_eq!(Shipper::detect_level("FATAL"), (LogLevel::Info, "FATAL"));
    }

    #[test]
    fn test_entry_carries_labels() {
        let shipper = Shipper::new(Arc::new(MockLogSink::new()), &settings(ShipMode::Unary));

        let entry = shipper.entry("ERROR Database connection failed").unwrap();
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.message, "Database connection failed");
        assert_eq!(entry.source, "app.log");
        assert_eq!(entry.service, "web-service");
        assert_eq!(entry.host, "server-01");
        assert_eq!(entry.tags.get("env").map(String::as_str), Some("production"));
        assert!(entry.id.is_none());
        assert!(entry.timestamp.is_some());

        assert!(shipper.entry("   ").is_none());
    }

    #[tokio::test]
    async fn test_unary_shipping_counts_acks() {
        let mut mock_sink = MockLogSink::new();
        let mut mock_source = MockLineSource::new();

        mock_source.expect_lines().times(1).return_once(|| {
            Box::pin(stream::iter(vec![
                "INFO first".to_string(),
                "".to_string(),
                "ERROR second".to_string(),
                "WARN third".to_string(),
            ]))
        });

        let mut calls = 0;
        mock_sink.expect_submit().times(3).returning(move |entry| {
            calls += 1;
            match calls {
                1 => Ok(accepted()),
                2 => Ok(Ack {
                    accepted: false,
                    message: format!("failed to enqueue log: {}", entry.message),
                    id: None,
                }),
                _ => Err(ShipError::EmptyReply("submit")),
            }
        });

        let shipper = Shipper::new(Arc::new(mock_sink), &settings(ShipMode::Unary));
        let report = shipper.ship(&mock_source).await.unwrap();

        assert_eq!(report.sent, 3);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 2);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let mut mock_sink = MockLogSink::new();
        mock_sink.expect_submit().never();

        let shipper = Shipper::new(Arc::new(mock_sink), &settings(ShipMode::Unary));
        let report = shipper.ship(&lines(&[])).await.unwrap();
        assert_eq!(report, Default::default());
    }

    #[tokio::test]
    async fn test_stream_shipping_uses_summary() {
        let sink = Arc::new(CollectingSink::default());
        let shipper = Shipper::new(sink.clone(), &settings(ShipMode::Stream));

        let report = shipper
            .ship(&lines(&["INFO one", "", "DEBUG two", "three"]))
            .await
            .unwrap();

        assert_eq!(report.sent, 3);
        assert_eq!(report.accepted, 3);
        assert_eq!(report.rejected, 0);

        let received = sink.received.lock().unwrap();
        let levels: Vec<_> = received.iter().map(|e| e.level.clone()).collect();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Debug, LogLevel::Info]);
    }

    #[tokio::test]
    async fn test_stream_failure_is_returned() {
        let mut mock_sink = MockLogSink::new();
        mock_sink
            .expect_submit_stream()
            .times(1)
            .return_once(|_| Err(ShipError::EmptyReply("do_put")));

        let shipper = Shipper::new(Arc::new(mock_sink), &settings(ShipMode::Stream));
        let result = shipper.ship(&lines(&["INFO one"])).await;
        assert!(result.unwrap_err().to_string().contains("do_put"));
    }

    #[tokio::test]
    async fn test_file_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "INFO started\n\nERROR stopped\n").unwrap();

        let read: Vec<String> = FileLines(path).lines().collect().await;
        assert_eq!(read, vec!["INFO started", "", "ERROR stopped"]);

        let missing: Vec<String> = FileLines(dir.path().join("missing.log")).lines().collect().await;
        assert!(missing.is_empty());
    }

    struct TestServer {
        flusher: FlushWorker,
        ingest_channel: Channel,
        sink: FlightSink,
    }

    async fn serve(role: ServiceRole, ingest: IngestService, queries: QueryService) -> Channel {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = FlightServiceServer::new(LogFlightService::new(role, ingest, queries));

        tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        Channel::from_shared(format!("http://{}", addr))
            .unwrap()
            .connect()
            .await
            .unwrap()
    }

    async fn logvault() -> TestServer {
        let queue = Arc::new(DuckDbQueue::new_in_memory().unwrap());
        let store = Arc::new(DuckDbStore::new_in_memory().unwrap());
        store.init().await.unwrap();

        let timeout = Duration::from_secs(5);
        let ingest = IngestService::new(queue.clone(), timeout);
        let queries = QueryService::new(store.clone(), Duration::from_millis(25), timeout);

        let ingest_channel = serve(ServiceRole::Ingest, ingest.clone(), queries.clone()).await;
        let query_channel = serve(ServiceRole::Query, ingest, queries).await;

        TestServer {
            flusher: FlushWorker::new(queue, store, FlushConfig::default()),
            ingest_channel: ingest_channel.clone(),
            sink: FlightSink::new(ingest_channel, query_channel),
        }
    }

    #[tokio::test]
    async fn test_flight_sink_unary_round_trip() {
        let server = logvault().await;

        let ack = server
            .sink
            .submit(LogEntry {
                level: LogLevel::Warn,
                message: "High memory usage detected".to_string(),
                source: "system.log".to_string(),
                service: "monitoring".to_string(),
                host: "server-01".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(ack.accepted);

        server.flusher.flush_once().await;

        let found = server
            .sink
            .query(LogQuery {
                service: vec!["monitoring".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.count, 1);
        assert_eq!(Some(found.records[0].id.clone()), ack.id);
    }

    #[tokio::test]
    async fn test_flight_sink_stream_and_tail() {
        let server = logvault().await;
        let sink = Arc::new(server.sink.clone());

        let mut tail = server
            .sink
            .tail(LogQuery {
                level: vec![LogLevel::Error],
                ..Default::default()
            })
            .await
            .unwrap();

        let shipper = Shipper::new(sink.clone(), &settings(ShipMode::Stream));
        let report = shipper
            .ship(&lines(&[
                "INFO Application started successfully",
                "ERROR Database connection failed",
                "WARN High memory usage detected",
            ]))
            .await
            .unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.accepted, 3);

        server.flusher.flush_once().await;

        let all = sink.query(LogQuery::default()).await.unwrap();
        assert_eq!(all.count, 3);

        let tailed = tokio::time::timeout(Duration::from_secs(5), tail.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(tailed.len(), 1);
        assert_eq!(tailed[0].message, "Database connection failed");
    }

    #[tokio::test]
    async fn test_query_against_ingest_listener_fails() {
        let server = logvault().await;
        let misrouted = FlightSink::new(server.ingest_channel.clone(), server.ingest_channel.clone());

        let err = misrouted.query(LogQuery::default()).await.unwrap_err();
        assert!(err.to_string().contains("not served on this listener"));
    }
}
