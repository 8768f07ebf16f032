use thiserror::Error;
use tracing_subscriber::filter::ParseError as TracingParseError;

use crate::config::ConfigError;
use crate::protocol::{ConnectionError, ProtocolError};

/// Result type alias with our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Custom error type for the bridge client
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failed to open, closed unexpectedly or was cancelled
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Malformed or unknown control envelope
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Tracing/logging error
    #[error("Logging error: {0}")]
    Logging(#[from] TracingParseError),
}

impl Error {
    /// Whether the error came from the transport layer
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}
