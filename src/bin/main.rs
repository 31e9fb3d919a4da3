//! Sends sample records (or the lines of a file) to a logvault server, then
//! reads them back.
//!
//! ```text
//! logship <server-address> [log-file]
//! ```
//!
//! `<server-address>` is the ingest listener; the query listener comes from
//! `LOGSHIP_QUERY_ADDR` or `config/*.toml`.

use chrono::Utc;
use logship::{FileLines, FlightSink, LogSink, ShipSettings, Shipper};
use logvault_core::{LogEntry, LogLevel, LogQuery};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn sample(level: LogLevel, message: &str, source: &str, service: &str, tags: [(&str, &str); 2]) -> LogEntry {
    LogEntry {
        id: None,
        timestamp: Some(Utc::now()),
        level,
        message: message.to_string(),
        source: source.to_string(),
        service: service.to_string(),
        host: "server-01".to_string(),
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        metadata: None,
    }
}

fn samples() -> Vec<LogEntry> {
    vec![
        sample(
            LogLevel::Info,
            "Application started successfully",
            "app.log",
            "web-service",
            [("env", "production"), ("version", "1.0.0")],
        ),
        sample(
            LogLevel::Error,
            "Database connection failed",
            "app.log",
            "web-service",
            [("env", "production"), ("component", "database")],
        ),
        sample(
            LogLevel::Warn,
            "High memory usage detected",
            "system.log",
            "monitoring",
            [("env", "production"), ("metric", "memory")],
        ),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let Some(server_addr) = args.next() else {
        error!("Usage: logship <server-address> [log-file]");
        std::process::exit(2);
    };

    // Initialize settings
    let mut settings = ShipSettings::new()?;
    settings.ingest_addr = server_addr;

    let sink = Arc::new(FlightSink::connect(&settings).await?);

    let since = Utc::now();
    match args.next() {
        Some(path) => {
            let shipper = Shipper::new(sink.clone(), &settings);
            let report = shipper.ship(&FileLines(PathBuf::from(path))).await?;
            info!(
                "Shipped {} lines: {} accepted, {} rejected",
                report.sent, report.accepted, report.rejected
            );
        }
        None => {
            for entry in samples() {
                match sink.submit(entry).await {
                    Ok(ack) if ack.accepted => info!("Log sent successfully: {}", ack.message),
                    Ok(ack) => warn!("Failed to send log: {}", ack.message),
                    Err(e) => warn!("Failed to send log: {}", e),
                }
            }
        }
    }

    // Records become visible after the server's next flush
    tokio::time::sleep(settings.settle()).await;
    let found = sink
        .query(LogQuery {
            start_time: Some(since - chrono::Duration::minutes(1)),
            ..Default::default()
        })
        .await?;

    println!("\nStored records ({}):", found.count);
    for record in &found.records {
        println!("- [{}] {} {}", record.timestamp, record.level, record.message);
        println!("  Source: {}  Service: {}  Host: {}", record.source, record.service, record.host);
        if !record.tags.is_empty() {
            println!("  Tags: {:?}", record.tags);
        }
    }

    Ok(())
}
