//! Worker-to-pool relay engine.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher (accept loop) --capacity-1 queue--> dispatch loop
//!                                                  |
//!                                   spawns one ClientRelay per connection
//!                                                  |
//!           +------------------+-------------------+------------------+
//!           | worker listener  |  control task     |  pool listener   |
//!           | decodes Requests |  takes the one    |  decodes pool    |
//!           | intercepts login |  Assignment, dials|  Responses and   |
//!           | forwards the rest|  and logs in      |  forwards them   |
//!           +------------------+-------------------+------------------+
//! ```
//!
//! Cancellation is a tree of [`CancellationToken`]s: the daemon's root token
//! parents the dispatcher's scope, which parents every relay's loop scope,
//! which parents the scopes of that relay's two listeners. Any task that
//! fails cancels its relay's loop scope; the relay then closes both sockets.
//! Sibling relays are unaffected.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

mod client;
mod dispatcher;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use strum::Display;

use crate::config::Config;
use crate::pool::PoolConnector;
use crate::stratum::DEFAULT_MAX_LINE_LENGTH;

pub use client::ClientRelay;
pub use dispatcher::Dispatcher;

/// Lifecycle of one relay. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    /// Waiting for the worker's login
    AwaitingLogin,
    /// Login resolved to a pool; connecting
    Assigned,
    /// Logged in to the pool; forwarding both ways
    Relaying,
    /// Both sockets closed
    Closed,
}

/// Counters shared by the dispatcher and all relays.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub accepted: AtomicU64,
    pub active: AtomicU64,
    pub closed: AtomicU64,
    pub assigned: AtomicU64,
    pub lookup_failures: AtomicU64,
    pub pool_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RelayStatsSnapshot {
    pub accepted: u64,
    pub active: u64,
    pub closed: u64,
    pub assigned: u64,
    pub lookup_failures: u64,
    pub pool_failures: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            assigned: self.assigned.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            pool_failures: self.pool_failures.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn decr(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Everything a relay needs besides its own socket.
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub config: Arc<Config>,
    pub connector: PoolConnector,
    pub stats: Arc<RelayStats>,
    pub max_line_length: usize,
}

impl RelayContext {
    pub fn new(config: Arc<Config>, connector: PoolConnector) -> Self {
        Self {
            config,
            connector,
            stats: Arc::new(RelayStats::default()),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}
