//! Query entity and SQL predicate construction for log retrieval.
//!
//! This module provides:
//! - [`LogQuery`], the per-request filters, buildable from a
//!   structured JSON body or from discrete `key=value` parameters
//! - [`QueryBuilder`], which accumulates typed clauses and a matching
//!   positional parameter list
//!
//! Column names come from the closed [`Column`] enum and every caller-supplied
//! value travels as a bound parameter. Nothing a caller sends is ever spliced
//! into SQL text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::debug;

use crate::error::LogError;
use crate::record::LogLevel;

/// Filters for a read request. Absent filters impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub level: Vec<LogLevel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<String>,
    /// Case-insensitive substring of `message`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Maximum rows to return; 0 means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Rows to skip after ordering; 0 means none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl LogQuery {
    /// Canonicalises level filters, rejecting any outside the named levels.
    pub fn normalize(&mut self) -> Result<(), LogError> {
        for level in self.level.iter_mut() {
            if let LogLevel::Other(text) = level {
                *level = LogLevel::parse_filter(text)?;
            }
        }
        Ok(())
    }

    /// Parses discrete `key=value` parameters.
    ///
    /// `level`, `source`, `service` and `host` may repeat. Empty values are
    /// skipped and unknown keys ignored; a value that does not parse is an
    /// error rather than a silently dropped filter.
    pub fn from_params<I, K, V>(params: I) -> Result<Self, LogError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = LogQuery::default();

        for (key, value) in params {
            let key = key.as_ref();
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }

            match key {
                "start_time" => query.start_time = Some(parse_time(key, value)?),
                "end_time" => query.end_time = Some(parse_time(key, value)?),
                "limit" => query.limit = Some(parse_count(key, value)?),
                "offset" => query.offset = Some(parse_count(key, value)?),
                "search" => query.search = Some(value.to_string()),
                "level" => query.level.push(LogLevel::parse_filter(value)?),
                "source" => query.source.push(value.to_string()),
                "service" => query.service.push(value.to_string()),
                "host" => query.host.push(value.to_string()),
                other => debug!("Ignoring unknown query parameter '{}'", other),
            }
        }

        Ok(query)
    }

    /// Parses a `key=value&key=value` string into parameters.
    ///
    /// Values are taken literally; no percent-decoding is applied.
    pub fn from_query_string(input: &str) -> Result<Self, LogError> {
        let pairs = input
            .trim_start_matches('?')
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            });
        Self::from_params(pairs)
    }
}

fn parse_time(key: &str, value: &str) -> Result<DateTime<Utc>, LogError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LogError::invalid_query(format!("{} '{}' is not RFC 3339: {}", key, value, e)))
}

fn parse_count(key: &str, value: &str) -> Result<u32, LogError> {
    value
        .parse()
        .map_err(|e| LogError::invalid_query(format!("{} '{}' is not a count: {}", key, value, e)))
}

/// Queryable columns of the `logs` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Seq,
    Timestamp,
    Level,
    Message,
    Source,
    Service,
    Host,
}

impl Column {
    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Seq => "seq",
            Column::Timestamp => "timestamp",
            Column::Level => "level",
            Column::Message => "message",
            Column::Source => "source",
            Column::Service => "service",
            Column::Host => "host",
        }
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A positional parameter bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Text(String),
}

/// Accumulates WHERE clauses and their parameters in placeholder order.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    select: &'static str,
    clauses: Vec<String>,
    params: Vec<SqlParam>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl QueryBuilder {
    /// Starts a query from a fixed `SELECT … FROM …` prefix.
    pub fn new(select: &'static str) -> Self {
        Self {
            select,
            clauses: Vec::new(),
            params: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Builds the predicate for a [`LogQuery`].
    pub fn for_query(select: &'static str, query: &LogQuery) -> Self {
        let mut builder = Self::new(select);
        if let Some(start) = query.start_time {
            builder.at_least(Column::Timestamp, start.timestamp_micros());
        }
        if let Some(end) = query.end_time {
            builder.at_most(Column::Timestamp, end.timestamp_micros());
        }
        let levels: Vec<String> = query.level.iter().map(|l| l.as_str().to_string()).collect();
        builder.any_of(Column::Level, &levels);
        builder.any_of(Column::Source, &query.source);
        builder.any_of(Column::Service, &query.service);
        builder.any_of(Column::Host, &query.host);
        if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
            builder.contains_ignore_case(Column::Message, search);
        }
        builder.limit = query.limit.filter(|n| *n > 0);
        builder.offset = query.offset.filter(|n| *n > 0);
        builder
    }

    pub fn at_least(&mut self, column: Column, value: i64) -> &mut Self {
        self.clauses.push(format!("{} >= ?", column));
        self.params.push(SqlParam::Int(value));
        self
    }

    pub fn at_most(&mut self, column: Column, value: i64) -> &mut Self {
        self.clauses.push(format!("{} <= ?", column));
        self.params.push(SqlParam::Int(value));
        self
    }

    pub fn greater_than(&mut self, column: Column, value: i64) -> &mut Self {
        self.clauses.push(format!("{} > ?", column));
        self.params.push(SqlParam::Int(value));
        self
    }

    /// Matches rows whose column equals any of `values`. Empty `values` adds nothing.
    pub fn any_of(&mut self, column: Column, values: &[String]) -> &mut Self {
        if values.is_empty() {
            return self;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.clauses.push(format!("{} IN ({})", column, placeholders));
        self.params.extend(values.iter().cloned().map(SqlParam::Text));
        self
    }

    pub fn contains_ignore_case(&mut self, column: Column, needle: &str) -> &mut Self {
        self.clauses.push(format!("contains(lower({}), lower(?))", column));
        self.params.push(SqlParam::Text(needle.to_string()));
        self
    }

    /// Drops pagination, e.g. for tail polls that must see every new row.
    pub fn unpaginated(&mut self) -> &mut Self {
        self.limit = None;
        self.offset = None;
        self
    }

    /// Renders the SQL text and its parameters.
    ///
    /// Ordering is always most recent first; `seq` breaks timestamp ties so
    /// pages stay stable.
    pub fn build(&self) -> (String, Vec<SqlParam>) {
        let mut sql = String::from(self.select);
        let mut params = self.params.clone();

        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }

        sql.push_str(" ORDER BY timestamp DESC, seq DESC");

        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlParam::Int(i64::from(limit)));
        }
        if let Some(offset) = self.offset {
            sql.push_str(" OFFSET ?");
            params.push(SqlParam::Int(i64::from(offset)));
        }

        (sql, params)
    }
}
