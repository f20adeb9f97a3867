//! Daemon lifecycle management for stratum-relay.
//!
//! This module wires the dispatcher and the optional diagnostics API together
//! under one cancellation token, and handles signals and graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::api::{self, ApiConfig, AppState};
use crate::config::Config;
use crate::pool::PoolConnector;
use crate::relay::{Dispatcher, RelayContext};
use crate::tracing::prelude::*;

/// The main daemon that owns the listener and every relay.
pub struct Daemon {
    config: Arc<Config>,
    listen_addr: String,
    connector: PoolConnector,
    api: Option<ApiConfig>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    /// Create a daemon that will accept workers on `listen_addr`.
    pub fn new(config: Arc<Config>, listen_addr: impl Into<String>) -> Self {
        Self {
            config,
            listen_addr: listen_addr.into(),
            connector: PoolConnector::default(),
            api: None,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Use `connector` for every pool connection.
    pub fn with_connector(mut self, connector: PoolConnector) -> Self {
        self.connector = connector;
        self
    }

    /// Also serve the diagnostics API.
    pub fn with_api(mut self, api: ApiConfig) -> Self {
        self.api = Some(api);
        self
    }

    /// Token whose cancellation stops the daemon, as a signal would.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the daemon until a signal arrives, the shutdown token is
    /// cancelled, or the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        // Any early return cancels whatever has been started so far.
        let _cancel_on_exit = self.shutdown.clone().drop_guard();

        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        let ctx = RelayContext::new(self.config.clone(), self.connector.clone());
        let dispatcher = Dispatcher::bind(&self.listen_addr, ctx.clone())
            .await
            .with_context(|| format!("could not listen on {}", self.listen_addr))?;

        let dispatcher = tokio::spawn({
            let shutdown = self.shutdown.clone();
            async move {
                let result = dispatcher.run(shutdown.clone()).await;
                if result.is_err() {
                    shutdown.cancel();
                }
                result
            }
        });

        if let Some(api_config) = self.api.clone() {
            let state = AppState::from(&ctx);
            self.tracker.spawn({
                let shutdown = self.shutdown.clone();
                async move {
                    if let Err(e) = api::serve(api_config, shutdown, state).await {
                        error!(error = %e, "API server failed");
                    }
                }
            });
        }
        self.tracker.close();

        info!(
            pools = self.config.pools().len(),
            workers = self.config.workers().len(),
            "Started."
        );

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            },
            _ = self.shutdown.cancelled() => {
                debug!("Shutdown requested");
            },
        }

        trace!("Shutting down.");
        self.shutdown.cancel();

        let result = dispatcher.await.context("dispatcher task panicked")?;
        self.tracker.wait().await;
        info!("Exiting.");

        result.context("dispatcher failed")
    }
}
