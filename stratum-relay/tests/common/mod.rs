//! Loopback harness: a real dispatcher, fake pools, and scripted workers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use stratum_relay::config::{Config, Pool, PoolRef, Worker};
use stratum_relay::pool::PoolConnector;
use stratum_relay::relay::{Dispatcher, RelayContext};
use stratum_relay::stratum::LineCodec;

pub const WAIT: Duration = Duration::from_secs(5);

/// One end of a JSON-lines connection.
pub struct Peer {
    reader: FramedRead<OwnedReadHalf, LineCodec>,
    writer: FramedWrite<OwnedWriteHalf, LineCodec>,
}

impl Peer {
    pub fn new(stream: TcpStream) -> Self {
        let (r, w) = stream.into_split();
        Self {
            reader: FramedRead::new(r, LineCodec::new()),
            writer: FramedWrite::new(w, LineCodec::new()),
        }
    }

    pub async fn connect(addr: SocketAddr) -> Self {
        Self::new(TcpStream::connect(addr).await.unwrap())
    }

    pub async fn send(&mut self, value: Value) {
        self.writer
            .send(Bytes::from(format!("{}\n", value)))
            .await
            .unwrap();
    }

    pub async fn recv(&mut self) -> Value {
        let line = timeout(WAIT, self.reader.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
            .expect("read error");
        serde_json::from_slice(&line).unwrap()
    }

    /// True once the other side has closed the connection.
    pub async fn closed(&mut self) -> bool {
        matches!(
            timeout(WAIT, self.reader.next()).await,
            Ok(None) | Ok(Some(Err(_)))
        )
    }
}

/// A listening socket standing in for an upstream pool.
pub struct FakePool {
    listener: TcpListener,
}

impl FakePool {
    pub async fn start() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn address(&self) -> String {
        format!("stratum+tcp://{}", self.listener.local_addr().unwrap())
    }

    pub async fn accept(&self) -> Peer {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("relay never dialed the pool")
            .unwrap();
        Peer::new(stream)
    }

    /// True if nothing dials this pool within `window`.
    pub async fn idle_for(&self, window: Duration) -> bool {
        timeout(window, self.listener.accept()).await.is_err()
    }
}

pub fn pool(name: &str, address: String) -> Pool {
    Pool {
        name: name.to_string(),
        address,
        username: None,
        password: "x".to_string(),
        timeout: 2,
    }
}

pub fn worker(username: &str, pool: &str) -> Worker {
    Worker {
        username: username.to_string(),
        pool: PoolRef {
            name: pool.to_string(),
        },
    }
}

/// A dispatcher running on an ephemeral loopback port.
pub struct Relay {
    pub addr: SocketAddr,
    pub ctx: RelayContext,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<stratum_relay::error::Result<()>>,
}

impl Relay {
    pub async fn start(config: Config) -> Self {
        let ctx = RelayContext::new(Arc::new(config), PoolConnector::default());
        let dispatcher = Dispatcher::bind("127.0.0.1:0", ctx.clone()).await.unwrap();
        let addr = dispatcher.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(dispatcher.run(shutdown.clone()));
        Self {
            addr,
            ctx,
            shutdown,
            handle,
        }
    }

    pub async fn worker(&self) -> Peer {
        Peer::connect(self.addr).await
    }

    pub async fn wait_active(&self, n: u64) {
        timeout(WAIT, async {
            while self.ctx.stats.snapshot().active != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("relay count never settled");
    }
}
