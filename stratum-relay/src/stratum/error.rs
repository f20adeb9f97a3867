//! Error types for the Stratum message layer.

use thiserror::Error;

/// Stratum protocol errors.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing required field in message
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Field present but holding the wrong kind of value
    #[error("Field '{field}' is not {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    /// Line exceeded the codec's maximum length before a terminator arrived
    #[error("Line exceeds maximum length of {0} bytes")]
    LineTooLong(usize),

    /// Peer closed the connection part way through a line
    #[error("Connection closed with {0} bytes of incomplete line buffered")]
    IncompleteLine(usize),

    /// Connection lost
    #[error("Connection lost")]
    Disconnected,
}

/// Convenient Result type for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;
