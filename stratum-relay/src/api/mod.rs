//! Diagnostics HTTP API.
//!
//! A small read-only REST API for watching a running relay: liveness, relay
//! counters, and the configured pools and workers. Built on Axum.
//!
//! The API binds to localhost only by default and does not require
//! authentication for local access.

mod v1;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::tracing::prelude::*;

pub use v1::{AppState, ErrorResponse, PoolSummary, WorkerSummary};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address to bind the API server to. Defaults to "127.0.0.1:7785".
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7785".to_string(),
        }
    }
}

/// Start the API server and run until `shutdown` is cancelled.
pub async fn serve(config: ApiConfig, shutdown: CancellationToken, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(&config.bind_addr).await?;
    serve_on(listener, shutdown, state).await
}

/// Run the API server on an already bound listener.
pub async fn serve_on(
    listener: TcpListener,
    shutdown: CancellationToken,
    state: AppState,
) -> Result<()> {
    let actual_addr = listener.local_addr()?;
    info!(url = %format!("http://{}", actual_addr), "API server listening.");

    if !actual_addr.ip().is_loopback() {
        warn!(
            "API server is bound to a non-localhost address ({}). \
             This exposes the API to the network without authentication.",
            actual_addr.ip()
        );
    }

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;

    debug!("API server stopped");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new().nest("/api/v1", v1::routes(state)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    )
}
