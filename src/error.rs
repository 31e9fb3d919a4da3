use arrow_flight::error::FlightError;
use logvault_core::LogError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShipError {
    #[error("Connection error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Flight error: {0}")]
    Flight(#[from] FlightError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record error: {0}")]
    Record(#[from] LogError),

    #[error("Server sent no reply to {0}")]
    EmptyReply(&'static str),
}
