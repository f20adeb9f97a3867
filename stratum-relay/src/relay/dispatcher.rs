//! Listening socket and the hand-off of accepted workers to relays.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::{ClientRelay, RelayContext, RelayStats};
use crate::error::Result;
use crate::tracing::prelude::*;

/// Accepts worker connections and starts a [`ClientRelay`] for each.
pub struct Dispatcher {
    listener: TcpListener,
    ctx: RelayContext,
}

impl Dispatcher {
    /// Bind the worker-facing listener.
    pub async fn bind(addr: &str, ctx: RelayContext) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(address = %listener.local_addr()?, "Listening for workers");
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` fires or the listener fails.
    ///
    /// Every relay started here runs under a child of `shutdown`, and all of
    /// them have closed by the time this returns.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let scope = shutdown.child_token();
        let relays = TaskTracker::new();
        let (tx, rx) = mpsc::channel(1);

        let dispatch = tokio::spawn(
            dispatch_loop(rx, self.ctx.clone(), scope.clone(), relays.clone())
                .in_current_span(),
        );

        let result = accept_loop(&self.listener, &self.ctx, &scope, tx).await;
        if result.is_err() {
            scope.cancel();
        }

        if let Err(e) = dispatch.await {
            error!(error = %e, "Dispatch loop panicked");
        }
        relays.close();
        debug!(active = relays.len(), "Waiting for relays to close");
        relays.wait().await;
        info!("Dispatcher stopped");

        result
    }
}

async fn accept_loop(
    listener: &TcpListener,
    ctx: &RelayContext,
    scope: &CancellationToken,
    tx: mpsc::Sender<(TcpStream, SocketAddr)>,
) -> Result<()> {
    loop {
        let accepted = tokio::select! {
            _ = scope.cancelled() => {
                debug!("Shutdown requested, no longer accepting workers");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) if is_transient(&e) => {
                warn!(error = %e, "Transient error accepting worker connection");
                continue;
            }
            Err(e) => {
                error!(error = %e, "Listener failed, shutting down dispatcher");
                return Err(e.into());
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Could not disable Nagle on worker socket");
        }
        RelayStats::incr(&ctx.stats.accepted);
        debug!(peer = %peer, "Accepted worker connection");

        tokio::select! {
            _ = scope.cancelled() => return Ok(()),
            sent = tx.send((stream, peer)) => {
                if sent.is_err() {
                    debug!("Dispatch loop gone, stopping accept loop");
                    return Ok(());
                }
            }
        }
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<(TcpStream, SocketAddr)>,
    ctx: RelayContext,
    scope: CancellationToken,
    relays: TaskTracker,
) {
    let mut next_id: u64 = 0;

    loop {
        let (stream, peer) = tokio::select! {
            _ = scope.cancelled() => break,
            next = rx.recv() => match next {
                Some(conn) => conn,
                None => break,
            },
        };

        next_id += 1;
        let relay = ClientRelay::new(next_id, stream, peer, ctx.clone());
        relays.spawn(relay.run(scope.clone()));
    }

    trace!("Dispatch loop stopped");
}

/// Accept failures that concern one connection rather than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
    )
}
