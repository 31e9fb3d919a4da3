use async_trait::async_trait;
use chrono::Utc;
use futures::future;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use logvault_core::ingest::{Ack, IngestSummary};
use logvault_core::query_service::QueryResult;
use logvault_core::{LogEntry, LogLevel, LogQuery};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::{ShipMode, ShipSettings};
use crate::error::ShipError;

/// A finite or endless sequence of raw log lines.
#[cfg_attr(test, automock)]
pub trait LineSource: Send + Sync {
    fn lines(&self) -> BoxStream<'static, String>;
}

/// Destination for shipped records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn submit(&self, entry: LogEntry) -> Result<Ack, ShipError>;
    async fn submit_stream(&self, entries: BoxStream<'static, LogEntry>) -> Result<IngestSummary, ShipError>;
    async fn query(&self, query: LogQuery) -> Result<QueryResult, ShipError>;
}

/// Lines held in memory.
pub struct StaticLines(pub Vec<String>);

impl LineSource for StaticLines {
    fn lines(&self) -> BoxStream<'static, String> {
        stream::iter(self.0.clone()).boxed()
    }
}

/// Lines of a file, read once to the end. An unreadable file yields nothing.
pub struct FileLines(pub PathBuf);

impl LineSource for FileLines {
    fn lines(&self) -> BoxStream<'static, String> {
        let path = self.0.clone();
        stream::once(async move { (File::open(&path).await, path) })
            .flat_map(|(opened, path)| match opened {
                Ok(file) => LinesStream::new(BufReader::new(file).lines())
                    .take_while(|line| future::ready(line.is_ok()))
                    .filter_map(|line| future::ready(line.ok()))
                    .boxed(),
                Err(e) => {
                    warn!("Cannot read {}: {}", path.display(), e);
                    stream::empty().boxed()
                }
            })
            .boxed()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShipReport {
    pub sent: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Labels every shipped record carries.
#[derive(Debug, Clone, Default)]
struct Labels {
    source: String,
    service: String,
    host: String,
    tags: HashMap<String, String>,
}

impl Labels {
    fn entry(&self, line: &str) -> Option<LogEntry> {
        if line.trim().is_empty() {
            return None;
        }
        let (level, message) = Shipper::detect_level(line);

        Some(LogEntry {
            id: None,
            timestamp: Some(Utc::now()),
            level,
            message: message.to_string(),
            source: self.source.clone(),
            service: self.service.clone(),
            host: self.host.clone(),
            tags: self.tags.clone(),
            metadata: None,
        })
    }
}

pub struct Shipper {
    sink: Arc<dyn LogSink>,
    labels: Labels,
    mode: ShipMode,
}

impl Shipper {
    pub fn new(sink: Arc<dyn LogSink>, settings: &ShipSettings) -> Self {
        Self {
            sink,
            labels: Labels {
                source: settings.source.clone(),
                service: settings.service.clone(),
                host: settings.host.clone(),
                tags: settings.tags.clone(),
            },
            mode: settings.mode,
        }
    }

    /// Splits a leading level token off `line`.
    ///
    /// Accepts `ERROR msg`, `[error] msg` and `Error: msg`; `WARNING` maps to
    /// `WARN`. Lines without a recognised token are `INFO` and kept whole.
    pub fn detect_level(line: &str) -> (LogLevel, &str) {
        let line = line.trim();
        let (token, rest) = match line.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, rest.trim_start()),
            None => (line, ""),
        };

        let bare = token
            .trim_start_matches('[')
            .trim_end_matches(':')
            .trim_end_matches(']')
            .to_ascii_uppercase();
        let level = match bare.as_str() {
            "WARNING" => LogLevel::Warn,
            other => LogLevel::from(other),
        };

        if level.is_known() && !rest.is_empty() {
            (level, rest)
        } else {
            (LogLevel::Info, line)
        }
    }

    /// Builds the entry for one line, or `None` for a blank line.
    pub fn entry(&self, line: &str) -> Option<LogEntry> {
        self.labels.entry(line)
    }

    /// Ships every non-blank line of `source`.
    ///
    /// In unary mode a failed submission is counted as rejected and shipping
    /// continues. In stream mode a broken stream fails the whole call.
    pub async fn ship(&self, source: &dyn LineSource) -> Result<ShipReport, ShipError> {
        match self.mode {
            ShipMode::Unary => Ok(self.ship_unary(source).await),
            ShipMode::Stream => self.ship_stream(source).await,
        }
    }

    async fn ship_unary(&self, source: &dyn LineSource) -> ShipReport {
        let mut report = ShipReport::default();
        let mut lines = source.lines();

        while let Some(line) = lines.next().await {
            let Some(entry) = self.entry(&line) else {
                continue;
            };
            report.sent += 1;

            match self.sink.submit(entry).await {
                Ok(ack) if ack.accepted => {
                    debug!("Log sent successfully: {}", ack.message);
                    report.accepted += 1;
                }
                Ok(ack) => {
                    warn!("Failed to send log: {}", ack.message);
                    report.rejected += 1;
                }
                Err(e) => {
                    warn!("Failed to send log: {}", e);
                    report.rejected += 1;
                }
            }
        }

        info!(
            "Shipped {} lines ({} accepted, {} rejected)",
            report.sent, report.accepted, report.rejected
        );
        report
    }

    async fn ship_stream(&self, source: &dyn LineSource) -> Result<ShipReport, ShipError> {
        let labels = self.labels.clone();
        let sent = Arc::new(AtomicU64::new(0));
        let counter = sent.clone();

        let entries = source
            .lines()
            .filter_map(move |line| future::ready(labels.entry(&line)))
            .inspect(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .boxed();

        let summary = self.sink.submit_stream(entries).await?;
        let report = ShipReport {
            sent: sent.load(Ordering::Relaxed),
            accepted: summary.processed_count,
            rejected: summary.rejected_count,
        };

        info!(
            "Streamed {} lines ({} accepted, {} rejected)",
            report.sent, report.accepted, report.rejected
        );
        Ok(report)
    }
}
