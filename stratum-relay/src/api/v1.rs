//! API version 1 endpoints.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::config::{Config, Pool};
use crate::relay::{RelayContext, RelayStats, RelayStatsSnapshot};
use crate::tracing::prelude::*;

/// Shared application state for API endpoints.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stats: Arc<RelayStats>,
}

impl AppState {
    pub fn new(config: Arc<Config>, stats: Arc<RelayStats>) -> Self {
        Self { config, stats }
    }

    fn pool_summary(&self, pool: &Pool) -> PoolSummary {
        PoolSummary {
            name: pool.name.clone(),
            address: pool.address.clone(),
            username: pool.username.clone(),
            timeout_secs: pool.timeout,
            workers: self
                .config
                .workers()
                .iter()
                .filter(|w| w.pool.name == pool.name)
                .count(),
        }
    }
}

impl From<&RelayContext> for AppState {
    fn from(ctx: &RelayContext) -> Self {
        Self::new(ctx.config.clone(), ctx.stats.clone())
    }
}

/// A configured pool. Passwords are never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolSummary {
    pub name: String,
    pub address: String,
    /// Login name override, if any
    pub username: Option<String>,
    pub timeout_secs: u64,
    /// Number of workers bound to this pool
    pub workers: usize,
}

/// A configured worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkerSummary {
    pub username: String,
    pub pool: String,
    /// False when the bound pool is missing from the configuration
    pub pool_configured: bool,
}

/// API error response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check endpoint handler.
async fn health() -> &'static str {
    "OK"
}

/// Relay counters.
///
/// # Example
/// ```bash
/// curl http://localhost:7785/api/v1/relays
/// ```
async fn relay_stats(State(state): State<AppState>) -> Json<RelayStatsSnapshot> {
    Json(state.stats.snapshot())
}

async fn list_pools(State(state): State<AppState>) -> Json<Vec<PoolSummary>> {
    let pools = state
        .config
        .pools()
        .iter()
        .map(|p| state.pool_summary(p))
        .collect::<Vec<_>>();
    debug!(count = pools.len(), "Listing pools");
    Json(pools)
}

async fn get_pool(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.config.lookup_pool(&name) {
        Ok(pool) => Json(state.pool_summary(pool)).into_response(),
        Err(e) => {
            let error = ErrorResponse {
                error: e.to_string(),
            };
            (StatusCode::NOT_FOUND, Json(error)).into_response()
        }
    }
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerSummary>> {
    let workers = state
        .config
        .workers()
        .iter()
        .map(|w| WorkerSummary {
            username: w.username.clone(),
            pool: w.pool.name.clone(),
            pool_configured: state.config.lookup_pool(&w.pool.name).is_ok(),
        })
        .collect();
    Json(workers)
}

/// Build the v1 API routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/relays", get(relay_stats))
        .route("/pools", get(list_pools))
        .route("/pools/:name", get(get_pool))
        .route("/workers", get(list_workers))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::serve_on;
    use crate::pool::PoolConnector;
    use std::net::SocketAddr;
    use std::sync::atomic::Ordering;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    const CONFIG: &str = r#"
        [[pool]]
        name = "main"
        address = "stratum+tcp://pool.example.com:3333"
        password = "hunter2"

        [[pool]]
        name = "backup"
        address = "stratum+tcp://backup.example.com:4444"
        username = "farm"
        timeout = 5

        [[worker]]
        username = "rig1"
        pool = { name = "main" }

        [[worker]]
        username = "rig2"
        pool = { name = "main" }

        [[worker]]
        username = "rig3"
        pool = { name = "retired" }
    "#;

    async fn start() -> (SocketAddr, AppState, CancellationToken) {
        let config = Arc::new(Config::from_toml_str(CONFIG).unwrap());
        let ctx = RelayContext::new(config, PoolConnector::default());
        let state = AppState::from(&ctx);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(serve_on(listener, shutdown.clone(), state.clone()));
        (addr, state, shutdown)
    }

    fn url(addr: SocketAddr, path: &str) -> String {
        format!("http://{}/api/v1{}", addr, path)
    }

    #[tokio::test]
    async fn test_health() {
        let (addr, _, _shutdown) = start().await;
        let body = reqwest::get(url(addr, "/health"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_relay_counters() {
        let (addr, state, _shutdown) = start().await;
        state.stats.accepted.store(3, Ordering::Relaxed);
        state.stats.active.store(2, Ordering::Relaxed);

        let stats: serde_json::Value = reqwest::get(url(addr, "/relays"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["accepted"], 3);
        assert_eq!(stats["active"], 2);
        assert_eq!(stats["pool_failures"], 0);
    }

    #[tokio::test]
    async fn test_pools_hide_passwords() {
        let (addr, _, _shutdown) = start().await;
        let response = reqwest::get(url(addr, "/pools")).await.unwrap();
        let body = response.text().await.unwrap();
        assert!(!body.contains("hunter2"));

        let pools: Vec<PoolSummary> = serde_json::from_str(&body).unwrap();
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].name, "main");
        assert_eq!(pools[0].workers, 2);
        assert_eq!(pools[1].username.as_deref(), Some("farm"));
        assert_eq!(pools[1].timeout_secs, 5);
    }

    #[tokio::test]
    async fn test_get_pool_by_name() {
        let (addr, _, _shutdown) = start().await;

        let pool: PoolSummary = reqwest::get(url(addr, "/pools/backup"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(pool.address, "stratum+tcp://backup.example.com:4444");

        let response = reqwest::get(url(addr, "/pools/nope")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let error: ErrorResponse = response.json().await.unwrap();
        assert!(error.error.contains("nope"));
    }

    #[tokio::test]
    async fn test_workers_flag_missing_pool() {
        let (addr, _, _shutdown) = start().await;
        let workers: Vec<WorkerSummary> = reqwest::get(url(addr, "/workers"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(workers.len(), 3);
        assert!(workers[0].pool_configured);
        assert_eq!(workers[2].username, "rig3");
        assert!(!workers[2].pool_configured);
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let config = Arc::new(Config::default());
        let state = AppState::new(config, Arc::new(RelayStats::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve_on(listener, shutdown.clone(), state));

        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
