//! Common error types for stratum-relay.
//!
//! Each concern has its own error enum next to the code that raises it. This
//! module provides a centralized Error enum using thiserror, with conversions
//! from those per-concern errors, for callers that cross module boundaries.

use thiserror::Error;

use crate::config::{ConfigError, LookupError};
use crate::pool::{AddressError, ConnectError};
use crate::stratum::StratumError;

/// Main error type for stratum-relay operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration load, write, or validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker or pool name not present in the configuration
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Malformed or unsupported pool address
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// Pool dial failures
    #[error("Pool error: {0}")]
    Connect(#[from] ConnectError),

    /// Protocol errors on either socket
    #[error("Protocol error: {0}")]
    Stratum(#[from] StratumError),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
