use thiserror::Error;
use crate::types::ids::ConnectionId;

#[derive(Error, Debug)]
pub enum Error {
    // Source Errors
    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable {
        source_name: String,
        reason: String,
    },

    #[error("Source {source_name} timed out after {timeout_ms}ms")]
    SourceTimeout {
        source_name: String,
        timeout_ms: u64,
    },

    #[error("Source {source_name} returned no rows")]
    EmptyResult {
        source_name: String,
    },

    #[error("Attempt against {source_name} was cancelled")]
    AttemptCancelled {
        source_name: String,
    },

    #[error("Source {source_name} does not support timeframe {timeframe}")]
    UnsupportedTimeframe {
        source_name: String,
        timeframe: String,
    },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    // Fetch Errors
    #[error("No compatible source for {0}")]
    NoCompatibleSource(String),

    #[error("All sources exhausted for {symbol}: {}", .failures.join("; "))]
    AllSourcesExhausted {
        symbol: String,
        failures: Vec<String>,
    },

    #[error("Invalid timeframe: {0}")]
    InvalidTimeframe(String),

    // Cache Errors
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    // Streaming Errors
    #[error("Send to connection {0} failed")]
    ConnectionSendFailure(ConnectionId),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // Serialization Errors
    #[error("Deserialization failed: {0}")]
    DeserializationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    // System Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Whether the racing fetcher may move on to another source after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable { .. }
                | Error::SourceTimeout { .. }
                | Error::EmptyResult { .. }
                | Error::UnsupportedTimeframe { .. }
                | Error::HttpError(_)
                | Error::DeserializationError(_)
        )
    }

    pub fn unavailable(source_name: &str, reason: impl Into<String>) -> Self {
        Error::SourceUnavailable {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::ConfigError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
