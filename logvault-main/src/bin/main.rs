//! logvault server binary.
//!
//! Opens the queue and the store, starts the flush worker, and serves two
//! Arrow Flight listeners: ingestion on `server.rpc_port` and queries on
//! `server.port`. Ctrl-C ends open live tails, drains both listeners and
//! stops the flush worker after its current cycle.
//!
//! # Configuration
//!
//! Configuration can be provided through multiple sources, in order of precedence:
//!
//! 1. Command-line arguments (highest precedence)
//! 2. Plain environment variables named by each flag (`SERVER_PORT`, `GRPC_PORT`, ...)
//! 3. Environment variables prefixed with `LOGVAULT_` (`LOGVAULT_FLUSH__BATCH_SIZE`)
//! 4. User-specified configuration file (via `--config`)
//! 5. System-wide configuration (`/etc/logvault/config.toml`)
//! 6. Default configuration (embedded in binary)
//!
//! ## Command-line Options
//!
//! ```text
//! Options:
//!   -c, --config <FILE>                 Path to configuration file
//!       --host <HOST>                   Bind address [env: SERVER_HOST]
//!       --port <PORT>                   Query listener port [env: SERVER_PORT]
//!       --rpc-port <PORT>               Ingest listener port [env: GRPC_PORT]
//!       --request-timeout-secs <SECS>   Per-request deadline [env: REQUEST_TIMEOUT_SECS]
//!       --db-path <PATH>                Store file [env: DB_PATH]
//!       --db-name <NAME>                Database name [env: DB_NAME]
//!       --queue-path <PATH>             Queue file [env: QUEUE_PATH]
//!       --queue-db <N>                  Logical queue index [env: QUEUE_DB]
//!       --flush-interval-secs <SECS>    Flush period [env: FLUSH_INTERVAL_SECS]
//!       --flush-batch-size <N>          Records per flush [env: FLUSH_BATCH_SIZE]
//!       --tail-interval-secs <SECS>     Live-tail poll period [env: TAIL_INTERVAL_SECS]
//!       --log-level <FILTER>            Default log filter [env: LOG_LEVEL]
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Run with default configuration
//! logvault
//!
//! # Keep everything in memory, flush every second
//! logvault --db-path :memory: --queue-path :memory: --flush-interval-secs 1
//!
//! # Run with environment variables
//! SERVER_HOST=0.0.0.0 GRPC_PORT=50051 RUST_LOG=logvault_core=debug logvault
//! ```

use arrow_flight::flight_service_server::FlightServiceServer;
use clap::Parser;
use logvault_core::{
    config::{CliArgs, Settings},
    flush::FlushWorker,
    ingest::IngestService,
    query_service::QueryService,
    queue::duckdb::DuckDbQueue,
    service::{LogFlightService, ServiceRole},
    storage::{duckdb::DuckDbStore, LogStore},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::lookup_host;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| format!("Could not resolve {}:{}", host, port).into())
}

async fn join_listener(
    task: JoinHandle<Result<(), tonic::transport::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    task.await??;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli_args = CliArgs::parse();

    // Load settings from config file and CLI args
    let settings = Settings::new(cli_args)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting logvault with settings:\n{}", settings);

    // Queue and store failures at startup are the only fatal errors
    let queue = Arc::new(DuckDbQueue::open(&settings.queue.path, settings.queue.db)?);
    let store = Arc::new(DuckDbStore::open(&settings.database.store_path())?);
    store.init().await?;

    let flusher = FlushWorker::new(queue.clone(), store.clone(), settings.flush_config()).spawn();

    let shutdown = CancellationToken::new();

    let ingest = IngestService::new(queue, settings.request_timeout());
    let queries = QueryService::new(store, settings.tail_interval(), settings.request_timeout())
        .with_shutdown(shutdown.child_token());

    let ingest_addr = resolve(&settings.server.host, settings.server.rpc_port).await?;
    let query_addr = resolve(&settings.server.host, settings.server.port).await?;

    // Deadlines are enforced per queue and store call, so a long do_put stream
    // or an open live tail is not cut off by a server-wide timeout.
    let ingest_stop = shutdown.clone();
    let ingest_server = Server::builder()
        .add_service(FlightServiceServer::new(LogFlightService::new(
            ServiceRole::Ingest,
            ingest.clone(),
            queries.clone(),
        )))
        .serve_with_shutdown(ingest_addr, async move { ingest_stop.cancelled().await });

    let query_stop = shutdown.clone();
    let query_server = Server::builder()
        .add_service(FlightServiceServer::new(LogFlightService::new(
            ServiceRole::Query,
            ingest,
            queries,
        )))
        .serve_with_shutdown(query_addr, async move { query_stop.cancelled().await });

    info!("Ingest listener on {}", ingest_addr);
    info!("Query listener on {}", query_addr);

    let ingest_task = tokio::spawn(ingest_server);
    let query_task = tokio::spawn(query_server);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    // The flusher stops on shutdown even while listeners are still draining
    let flusher_stop = shutdown.clone();
    let flusher_task = tokio::spawn(async move {
        flusher_stop.cancelled().await;
        flusher.stop().await;
    });

    let served = tokio::try_join!(join_listener(ingest_task), join_listener(query_task));
    shutdown.cancel();
    if let Err(e) = flusher_task.await {
        error!("Flush worker did not stop cleanly: {}", e);
    }
    served?;

    info!("logvault stopped");
    Ok(())
}
