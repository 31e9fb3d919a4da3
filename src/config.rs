use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// How the shipper hands records to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShipMode {
    /// One `submit` action per record.
    Unary,
    /// All records in one `do_put` stream.
    Stream,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShipSettings {
    /// Ingest listener of the logvault server.
    pub ingest_addr: String,
    /// Query listener of the logvault server.
    pub query_addr: String,
    pub source: String,
    pub service: String,
    pub host: String,
    /// Static tags attached to every shipped record.
    pub tags: HashMap<String, String>,
    pub mode: ShipMode,
    pub timeout_secs: u64,
    /// Wait before reading shipped records back; should exceed the server's
    /// flush interval.
    pub settle_secs: u64,
}

impl ShipSettings {
    /// Loads `config/default.toml`, then `config/local.toml`, then `LOGSHIP_*`
    /// variables (`LOGSHIP_SERVICE`, `LOGSHIP_TAGS__ENV`).
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(Path::new("config"))
    }

    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("LOGSHIP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

impl Default for ShipSettings {
    fn default() -> Self {
        Self {
            ingest_addr: "http://localhost:9090".to_string(),
            query_addr: "http://localhost:8080".to_string(),
            source: "stdin".to_string(),
            service: "logship".to_string(),
            host: "localhost".to_string(),
            tags: HashMap::new(),
            mode: ShipMode::Unary,
            timeout_secs: 5,
            settle_secs: 6,
        }
    }
}

/// Prefixes `http://` to a bare `host:port` address.
pub fn endpoint_uri(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}
