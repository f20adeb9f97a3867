//! Upstream pool connectivity.
//!
//! This module opens transport connections to pools. It only establishes the
//! connection; the relay sends the login itself over the returned stream.
//! Failed dials are retried according to a pluggable [`RetryPolicy`].

mod address;
mod retry;

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::Pool;
use crate::tracing::prelude::*;

pub use address::{AddressError, Protocol, Transport, TransportAddress};
pub use retry::{ExponentialBackoff, NoRetry, RetryPolicy};

/// Errors connecting to a pool.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("while connecting to pool: {0}")]
    Address(#[from] AddressError),

    #[error("while dialing {address} via {transport}: {source}")]
    Dial {
        transport: Transport,
        address: String,
        source: std::io::Error,
    },

    #[error("timed out dialing {address} after {seconds}s")]
    Timeout { address: String, seconds: u64 },

    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectError {
    fn is_retryable(&self) -> bool {
        matches!(self, ConnectError::Dial { .. } | ConnectError::Timeout { .. })
    }
}

/// Opens connections to pools.
///
/// Cheap to clone; every relay holds one.
#[derive(Debug, Clone)]
pub struct PoolConnector {
    retry: Arc<dyn RetryPolicy>,
}

impl Default for PoolConnector {
    fn default() -> Self {
        Self::new(Arc::new(NoRetry))
    }
}

impl PoolConnector {
    pub fn new(retry: Arc<dyn RetryPolicy>) -> Self {
        Self { retry }
    }

    /// Connect to `pool`, retrying per policy until it gives up or `cancel`
    /// fires.
    pub async fn connect(
        &self,
        pool: &Pool,
        cancel: &CancellationToken,
    ) -> Result<TcpStream, ConnectError> {
        let address = pool.transport_address()?;
        let mut failed_attempts = 0;

        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
                result = dial(pool, &address) => result,
            };

            let err = match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            failed_attempts += 1;
            let Some(delay) = self.retry.next_delay(failed_attempts) else {
                return Err(err);
            };

            warn!(
                pool = %pool.name,
                attempt = failed_attempts,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Pool dial failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
                _ = time::sleep(delay) => {}
            }
        }
    }
}

async fn dial(pool: &Pool, address: &TransportAddress) -> Result<TcpStream, ConnectError> {
    debug!(
        address = %pool.address,
        pool = %pool.name,
        timeout = pool.timeout,
        "Attempting connection to pool"
    );

    let socket_addr = address.socket_addr();
    let stream = match address.transport {
        Transport::Tcp => time::timeout(pool.dial_timeout(), TcpStream::connect(&socket_addr))
            .await
            .map_err(|_| ConnectError::Timeout {
                address: socket_addr.clone(),
                seconds: pool.timeout,
            })?
            .map_err(|source| ConnectError::Dial {
                transport: address.transport,
                address: socket_addr.clone(),
                source,
            })?,
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Could not disable Nagle on pool socket");
    }

    debug!(pool = %pool.name, address = %socket_addr, "Connected to pool");
    Ok(stream)
}
