//! logship: Log Shipping Agent for logvault
//!
//! Turns streams of raw log lines into log records, ships them to a logvault
//! server over Arrow Flight and reads them back.
//!
//! # Example
//!
//! ```rust,no_run
//! use logship::{FlightSink, LogSink, ShipSettings, Shipper, StaticLines};
//! use logvault_core::LogQuery;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Initialize settings
//!     let settings = ShipSettings::new()?;
//!
//!     // Connect to the ingest and query listeners
//!     let sink = Arc::new(FlightSink::connect(&settings).await?);
//!
//!     // Ship a few lines
//!     let shipper = Shipper::new(sink.clone(), &settings);
//!     let report = shipper
//!         .ship(&StaticLines(vec![
//!             "INFO Application started successfully".to_string(),
//!             "ERROR Database connection failed".to_string(),
//!         ]))
//!         .await?;
//!     println!("Shipped: {:?}", report);
//!
//!     // Read them back
//!     let found = sink.query(LogQuery::default()).await?;
//!     println!("Stored records: {}", found.count);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod flight_sink;
pub mod shipper;
pub mod tests;

pub use config::{ShipMode, ShipSettings};
pub use error::ShipError;
pub use flight_sink::FlightSink;
pub use shipper::{FileLines, LineSource, LogSink, ShipReport, Shipper, StaticLines};
