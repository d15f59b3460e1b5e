//! Error types for the listening pipeline.

use thiserror::Error;

/// Main error type for interception, decoding and streaming.
#[derive(Debug, Error)]
pub enum TapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Failed to decode {table} entry: {reason}")]
    Decode { table: String, reason: String },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown sink type: {0}")]
    UnknownSink(String),

    #[error("Streaming service not initialized")]
    NotInitialized,

    #[error("Streaming service is closed")]
    Closed,

    #[error("Sink error on path {path}: {source}")]
    Sink {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl TapError {
    pub(crate) fn decode(table: &str, reason: impl Into<String>) -> Self {
        TapError::Decode {
            table: table.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for TapError {
    fn from(e: serde_json::Error) -> Self {
        TapError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for TapError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TapError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TapError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TapError::Deserialization(e.to_string())
    }
}

/// Result type for listening operations.
pub type Result<T> = std::result::Result<T, TapError>;
