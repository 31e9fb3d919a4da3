//! Configuration management for the logvault service.
//!
//! This module provides configuration handling through multiple sources:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/logvault/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables prefixed with `LOGVAULT_`, sections separated by
//!    `__` (e.g. `LOGVAULT_FLUSH__BATCH_SIZE=500`)
//! 5. Command-line arguments, each also readable from a plain environment
//!    variable (`SERVER_HOST`, `GRPC_PORT`, `DB_NAME`, `QUEUE_DB`, ...)
//!
//! Configuration options are loaded in order of precedence, with later sources
//! overriding earlier ones.
//!
//! DuckDB is embedded, so the store and queue are opened from `database.path`
//! and `queue.path`. The remaining connection fields (host, port, user, SSL
//! mode) are carried for diagnostics and printed with passwords redacted.

use clap::Parser;
use config::{Config, ConfigError};
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use crate::flush::FlushConfig;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const DEFAULT_CONFIG_PATH: &str = "/etc/logvault/config.toml";

/// Command-line arguments parser.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Bind address for both listeners
    #[arg(long, env = "SERVER_HOST")]
    pub host: Option<String>,

    /// Query listener port
    #[arg(long, env = "SERVER_PORT")]
    pub port: Option<u16>,

    /// Ingest listener port
    #[arg(long, env = "GRPC_PORT")]
    pub rpc_port: Option<u16>,

    /// Per-request deadline in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Store database file; ":memory:" for a transient store
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<String>,

    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    #[arg(long, env = "DB_PORT")]
    pub db_port: Option<u16>,

    /// Database name; also names the default store file
    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    #[arg(long, env = "DB_SSL_MODE")]
    pub db_ssl_mode: Option<String>,

    /// Queue database file; ":memory:" for a transient queue
    #[arg(long, env = "QUEUE_PATH")]
    pub queue_path: Option<String>,

    #[arg(long, env = "QUEUE_HOST")]
    pub queue_host: Option<String>,

    #[arg(long, env = "QUEUE_PORT")]
    pub queue_port: Option<u16>,

    #[arg(long, env = "QUEUE_PASSWORD", hide_env_values = true)]
    pub queue_password: Option<String>,

    /// Logical queue index
    #[arg(long, env = "QUEUE_DB")]
    pub queue_db: Option<u32>,

    /// Seconds between flush cycles
    #[arg(long, env = "FLUSH_INTERVAL_SECS")]
    pub flush_interval_secs: Option<u64>,

    /// Maximum records moved per flush cycle
    #[arg(long, env = "FLUSH_BATCH_SIZE")]
    pub flush_batch_size: Option<u64>,

    /// Seconds between live-tail polls
    #[arg(long, env = "TAIL_INTERVAL_SECS")]
    pub tail_interval_secs: Option<u64>,

    /// Default tracing filter when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Complete service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub flush: FlushSettings,
    pub tail: TailSettings,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    /// Query listener
    pub port: u16,
    /// Ingest listener
    pub rpc_port: u16,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Store file. Defaults to `<name>.duckdb`.
    #[serde(default)]
    pub path: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub ssl_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub path: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: String,
    pub db: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlushSettings {
    pub interval_secs: u64,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TailSettings {
    pub interval_secs: u64,
}

impl DatabaseConfig {
    pub fn store_path(&self) -> String {
        match &self.path {
            Some(path) if !path.is_empty() => path.clone(),
            _ => format!("{}.duckdb", self.name),
        }
    }
}

impl Settings {
    /// Loads configuration from all available sources.
    pub fn new(cli: CliArgs) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load default configuration
        builder = builder.add_source(config::File::from_str(
            DEFAULT_CONFIG,
            config::FileFormat::Toml,
        ));

        // Load system configuration if it exists
        if let Ok(metadata) = std::fs::metadata(DEFAULT_CONFIG_PATH) {
            if metadata.is_file() {
                builder = builder.add_source(config::File::from(PathBuf::from(DEFAULT_CONFIG_PATH)));
            }
        }

        // Load user configuration if specified
        if let Some(ref config_path) = cli.config {
            builder = builder.add_source(config::File::from(config_path.clone()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("LOGVAULT")
                .prefix_separator("_")
                .separator("__"),
        );

        // Server
        if let Some(ref host) = cli.host {
            builder = builder.set_override("server.host", host.as_str())?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(port) = cli.rpc_port {
            builder = builder.set_override("server.rpc_port", port)?;
        }
        if let Some(secs) = cli.request_timeout_secs {
            builder = builder.set_override("server.request_timeout_secs", secs)?;
        }

        // Database
        if let Some(ref path) = cli.db_path {
            builder = builder.set_override("database.path", path.as_str())?;
        }
        if let Some(ref host) = cli.db_host {
            builder = builder.set_override("database.host", host.as_str())?;
        }
        if let Some(port) = cli.db_port {
            builder = builder.set_override("database.port", port)?;
        }
        if let Some(ref name) = cli.db_name {
            builder = builder.set_override("database.name", name.as_str())?;
        }
        if let Some(ref user) = cli.db_user {
            builder = builder.set_override("database.user", user.as_str())?;
        }
        if let Some(ref password) = cli.db_password {
            builder = builder.set_override("database.password", password.as_str())?;
        }
        if let Some(ref mode) = cli.db_ssl_mode {
            builder = builder.set_override("database.ssl_mode", mode.as_str())?;
        }

        // Queue
        if let Some(ref path) = cli.queue_path {
            builder = builder.set_override("queue.path", path.as_str())?;
        }
        if let Some(ref host) = cli.queue_host {
            builder = builder.set_override("queue.host", host.as_str())?;
        }
        if let Some(port) = cli.queue_port {
            builder = builder.set_override("queue.port", port)?;
        }
        if let Some(ref password) = cli.queue_password {
            builder = builder.set_override("queue.password", password.as_str())?;
        }
        if let Some(db) = cli.queue_db {
            builder = builder.set_override("queue.db", i64::from(db))?;
        }

        // Workers
        if let Some(secs) = cli.flush_interval_secs {
            builder = builder.set_override("flush.interval_secs", secs)?;
        }
        if let Some(size) = cli.flush_batch_size {
            builder = builder.set_override("flush.batch_size", size)?;
        }
        if let Some(secs) = cli.tail_interval_secs {
            builder = builder.set_override("tail.interval_secs", secs)?;
        }
        if let Some(ref level) = cli.log_level {
            builder = builder.set_override("log_level", level.as_str())?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.flush.batch_size == 0 {
            return Err(ConfigError::Message("flush.batch_size must be positive".to_string()));
        }
        if self.flush.interval_secs == 0 || self.tail.interval_secs == 0 {
            return Err(ConfigError::Message("flush and tail intervals must be positive".to_string()));
        }
        if self.server.port == self.server.rpc_port {
            return Err(ConfigError::Message(format!(
                "server.port and server.rpc_port must differ (both {})",
                self.server.port
            )));
        }
        Ok(())
    }

    pub fn flush_config(&self) -> FlushConfig {
        FlushConfig {
            interval: Duration::from_secs(self.flush.interval_secs),
            batch_size: self.flush.batch_size,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn tail_interval(&self) -> Duration {
        Duration::from_secs(self.tail.interval_secs)
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl Display for Settings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "server: {} (query :{}, ingest :{}, timeout {}s)",
            self.server.host, self.server.port, self.server.rpc_port, self.server.request_timeout_secs
        )?;
        writeln!(
            f,
            "database: {} [{}@{}:{}/{} sslmode={} password={}]",
            self.database.store_path(),
            self.database.user,
            self.database.host,
            self.database.port,
            self.database.name,
            self.database.ssl_mode,
            redact(&self.database.password)
        )?;
        writeln!(
            f,
            "queue: {} db={} [{}:{} password={}]",
            self.queue.path,
            self.queue.db,
            self.queue.host,
            self.queue.port,
            redact(&self.queue.password)
        )?;
        write!(
            f,
            "flush: every {}s, batch {}; tail: every {}s; log level {}",
            self.flush.interval_secs, self.flush.batch_size, self.tail.interval_secs, self.log_level
        )
    }
}
