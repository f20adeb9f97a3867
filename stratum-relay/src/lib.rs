//! Intercepting Stratum proxy.
//!
//! Mining workers connect to the relay instead of to a pool. The relay reads
//! each worker's `login`, looks the worker up in its configuration, opens a
//! connection to the pool that worker is bound to, logs in there on the
//! worker's behalf, and from then on forwards every line in both directions.

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod pool;
pub mod relay;
pub mod stratum;
pub mod tracing;
