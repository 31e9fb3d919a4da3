//! Log record data model and its Arrow representation.
//!
//! A [`LogEntry`] is what producers send; it may lack an `id` or a
//! `timestamp`. A [`LogRecord`] is complete and is the only shape accepted by
//! the queue and the store.

use arrow_array::{Array, ArrayRef, BinaryArray, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::error::LogError;

/// Severity of a log record.
///
/// The five named levels are the contract for query filters. Any other text a
/// producer sends is kept verbatim in `Other` and round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Other(String),
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
            LogLevel::Other(s) => s.as_str(),
        }
    }

    /// Strict parser for query filters: case-insensitive, enumeration only.
    pub fn parse_filter(value: &str) -> Result<Self, LogError> {
        match LogLevel::from(value.trim().to_ascii_uppercase()) {
            LogLevel::Other(_) => Err(LogError::invalid_query(format!(
                "unknown level '{}', expected one of DEBUG, INFO, WARN, ERROR, FATAL",
                value
            ))),
            level => Ok(level),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, LogLevel::Other(_))
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl From<String> for LogLevel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            "FATAL" => LogLevel::Fatal,
            _ => LogLevel::Other(value),
        }
    }
}

impl From<&str> for LogLevel {
    fn from(value: &str) -> Self {
        LogLevel::from(value.to_string())
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A record as submitted by a producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Producer-supplied identifier; generated at ingest when absent or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Time the event occurred; defaults to ingest time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Opaque payload, passed through unexamined. Hex text in JSON.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_bytes_opt")]
    pub metadata: Option<Vec<u8>>,
}

/// A complete log record with identity and timestamp assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
    pub service: String,
    pub host: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default, with = "hex_bytes")]
    pub metadata: Vec<u8>,
}

impl LogRecord {
    /// Completes an entry with the given identity and timestamp defaults.
    ///
    /// Timestamps are truncated to microseconds, the store's resolution.
    pub fn from_entry(
        entry: LogEntry,
        default_id: impl FnOnce() -> String,
        default_timestamp: impl FnOnce() -> DateTime<Utc>,
    ) -> Self {
        let id = match entry.id {
            Some(id) if !id.is_empty() => id,
            _ => default_id(),
        };
        let timestamp = entry.timestamp.unwrap_or_else(default_timestamp).trunc_subsecs(6);

        Self {
            id,
            timestamp,
            level: entry.level,
            message: entry.message,
            source: entry.source,
            service: entry.service,
            host: entry.host,
            tags: entry.tags,
            metadata: entry.metadata.unwrap_or_default(),
        }
    }
}

impl From<LogRecord> for LogEntry {
    fn from(record: LogRecord) -> Self {
        let metadata = if record.metadata.is_empty() {
            None
        } else {
            Some(record.metadata)
        };
        LogEntry {
            id: Some(record.id),
            timestamp: Some(record.timestamp),
            level: record.level,
            message: record.message,
            source: record.source,
            service: record.service,
            host: record.host,
            tags: record.tags,
            metadata,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => hex::decode(text).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Gets the schema for log records in Arrow format.
///
/// `id` and `timestamp` are nullable so producers can leave them to the server.
/// Timestamps are microseconds since the Unix epoch; tags are JSON text.
pub fn log_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, true),
        Field::new("timestamp", DataType::Int64, true),
        Field::new("level", DataType::Utf8, false),
        Field::new("message", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("service", DataType::Utf8, false),
        Field::new("host", DataType::Utf8, false),
        Field::new("tags", DataType::Utf8, true),
        Field::new("metadata", DataType::Binary, true),
    ])
}

/// Creates a RecordBatch from complete log records.
pub fn create_record_batch(records: &[LogRecord]) -> Result<RecordBatch, LogError> {
    let entries: Vec<LogEntry> = records.iter().cloned().map(LogEntry::from).collect();
    create_entry_batch(&entries)
}

/// Creates a RecordBatch from producer entries, leaving absent ids and timestamps null.
pub fn create_entry_batch(entries: &[LogEntry]) -> Result<RecordBatch, LogError> {
    let ids = StringArray::from(entries.iter().map(|e| e.id.as_deref()).collect::<Vec<_>>());
    let timestamps = Int64Array::from(
        entries
            .iter()
            .map(|e| e.timestamp.map(|t| t.timestamp_micros()))
            .collect::<Vec<_>>(),
    );
    let levels = StringArray::from_iter_values(entries.iter().map(|e| e.level.as_str()));
    let messages = StringArray::from_iter_values(entries.iter().map(|e| e.message.as_str()));
    let sources = StringArray::from_iter_values(entries.iter().map(|e| e.source.as_str()));
    let services = StringArray::from_iter_values(entries.iter().map(|e| e.service.as_str()));
    let hosts = StringArray::from_iter_values(entries.iter().map(|e| e.host.as_str()));

    let mut tags = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.tags.is_empty() {
            tags.push(None);
        } else {
            tags.push(Some(serde_json::to_string(&entry.tags)?));
        }
    }
    let tags = StringArray::from(tags);
    let metadata = BinaryArray::from(
        entries
            .iter()
            .map(|e| e.metadata.as_deref())
            .collect::<Vec<_>>(),
    );

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(ids),
        Arc::new(timestamps),
        Arc::new(levels),
        Arc::new(messages),
        Arc::new(sources),
        Arc::new(services),
        Arc::new(hosts),
        Arc::new(tags),
        Arc::new(metadata),
    ];

    Ok(RecordBatch::try_new(Arc::new(log_schema()), arrays)?)
}

/// Decodes a RecordBatch into producer entries.
///
/// `level` and `message` are required; every other column may be absent or null.
pub fn decode_record_batch(batch: &RecordBatch) -> Result<Vec<LogEntry>, LogError> {
    let levels = required_utf8(batch, "level")?;
    let messages = required_utf8(batch, "message")?;
    let ids = optional_utf8(batch, "id")?;
    let sources = optional_utf8(batch, "source")?;
    let services = optional_utf8(batch, "service")?;
    let hosts = optional_utf8(batch, "host")?;
    let tags = optional_utf8(batch, "tags")?;

    let timestamps = match batch.column_by_name("timestamp") {
        None => None,
        Some(col) => Some(
            col.as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| LogError::InvalidRecord("Invalid timestamp column".to_string()))?,
        ),
    };
    let metadata = match batch.column_by_name("metadata") {
        None => None,
        Some(col) => Some(
            col.as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(|| LogError::InvalidRecord("Invalid metadata column".to_string()))?,
        ),
    };

    let mut entries = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let timestamp = match timestamps {
            Some(col) if !col.is_null(i) => {
                let micros = col.value(i);
                Some(DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
                    LogError::InvalidRecord(format!("timestamp {} out of range", micros))
                })?)
            }
            _ => None,
        };
        let tags = match string_at(tags, i) {
            Some(text) if !text.is_empty() => serde_json::from_str(&text)
                .map_err(|e| LogError::InvalidRecord(format!("Invalid tags in row {}: {}", i, e)))?,
            _ => HashMap::new(),
        };
        let metadata = match metadata {
            Some(col) if !col.is_null(i) => Some(col.value(i).to_vec()),
            _ => None,
        };

        entries.push(LogEntry {
            id: string_at(ids, i).filter(|id| !id.is_empty()),
            timestamp,
            level: LogLevel::from(levels.value(i)),
            message: messages.value(i).to_string(),
            source: string_at(sources, i).unwrap_or_default(),
            service: string_at(services, i).unwrap_or_default(),
            host: string_at(hosts, i).unwrap_or_default(),
            tags,
            metadata,
        });
    }

    Ok(entries)
}

fn required_utf8<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, LogError> {
    optional_utf8(batch, name)?
        .ok_or_else(|| LogError::InvalidRecord(format!("Missing {} column", name)))
}

fn optional_utf8<'a>(batch: &'a RecordBatch, name: &str) -> Result<Option<&'a StringArray>, LogError> {
    match batch.column_by_name(name) {
        None => Ok(None),
        Some(col) => col
            .as_any()
            .downcast_ref::<StringArray>()
            .map(Some)
            .ok_or_else(|| LogError::InvalidRecord(format!("Invalid {} column", name))),
    }
}

fn string_at(col: Option<&StringArray>, i: usize) -> Option<String> {
    col.filter(|c| !c.is_null(i)).map(|c| c.value(i).to_string())
}
