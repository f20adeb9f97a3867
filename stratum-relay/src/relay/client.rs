//! Per-connection relay between one worker and its pool.
//!
//! A [`ClientRelay`] owns the worker's socket from the moment it is accepted.
//! It waits for the worker's login, resolves the worker to a pool, opens and
//! logs in to that pool, and then forwards every message in both directions
//! in arrival order. It moves through [`RelayState`]s strictly forward and
//! ends in [`RelayState::Closed`] with both sockets closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info_span, Instrument};

use super::{RelayContext, RelayState, RelayStats};
use crate::config::{LookupError, Pool, Worker};
use crate::error::{Error, Result};
use crate::pool::ConnectError;
use crate::stratum::{
    create_login_request, ErrorCode, LineCodec, Message, Params, Request, Response, StratumError,
};
use crate::tracing::prelude::*;

type LineReader = FramedRead<OwnedReadHalf, LineCodec>;
type LineWriter = FramedWrite<OwnedWriteHalf, LineCodec>;

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A resolved login, handed from the worker listener to the control task.
#[derive(Debug)]
struct Assignment {
    pool: Pool,
    worker: Worker,
    login_id: Option<i64>,
    login_params: Params,
}

/// One worker connection and, once assigned, its pool connection.
pub struct ClientRelay {
    id: u64,
    peer: SocketAddr,
    ctx: RelayContext,
    worker_reader: LineReader,
    worker_writer: LineWriter,
    state: watch::Sender<RelayState>,
}

impl ClientRelay {
    /// Take ownership of an accepted worker connection.
    pub fn new(id: u64, stream: TcpStream, peer: SocketAddr, ctx: RelayContext) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (state, _) = watch::channel(RelayState::AwaitingLogin);

        let max = ctx.max_line_length;
        Self {
            id,
            peer,
            worker_reader: FramedRead::new(read_half, LineCodec::with_max_length(max)),
            worker_writer: FramedWrite::new(write_half, LineCodec::with_max_length(max)),
            ctx,
            state,
        }
    }

    /// Watch this relay's state.
    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Run until either side closes, a task fails, or `parent` is cancelled.
    ///
    /// Returns only after every task of this relay has finished and both
    /// sockets are closed.
    pub async fn run(self, parent: CancellationToken) {
        let span = info_span!("relay", id = self.id, peer = %self.peer);
        self.run_inner(parent).instrument(span).await
    }

    async fn run_inner(self, parent: CancellationToken) {
        let stats = self.ctx.stats.clone();
        RelayStats::incr(&stats.active);
        debug!("Launching client event loop");

        let shared = Arc::new(Shared {
            ctx: self.ctx,
            worker_sink: Mutex::new(self.worker_writer),
            pool_sink: Mutex::new(None),
            state: self.state,
            loop_token: parent.child_token(),
        });

        let (work_tx, work_rx) = mpsc::channel(1);
        let tracker = TaskTracker::new();

        tracker.spawn(
            worker_listener(
                shared.clone(),
                self.worker_reader,
                work_tx,
                shared.loop_token.child_token(),
            )
            .in_current_span(),
        );
        tracker.spawn(control(shared.clone(), work_rx, tracker.clone()).in_current_span());

        shared.loop_token.cancelled().await;
        info!("Stopping client event loop");

        tracker.close();
        tracker.wait().await;
        shared.close_sockets().await;
        shared.advance(RelayState::Closed);

        RelayStats::decr(&stats.active);
        RelayStats::incr(&stats.closed);
        debug!("Client event loop stopped");
    }
}

/// State shared by the tasks of one relay.
struct Shared {
    ctx: RelayContext,
    worker_sink: Mutex<LineWriter>,
    pool_sink: Mutex<Option<LineWriter>>,
    state: watch::Sender<RelayState>,
    loop_token: CancellationToken,
}

impl Shared {
    fn current_state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Move to `next` if it is later than the current state.
    fn advance(&self, next: RelayState) {
        self.state.send_if_modified(|state| {
            if next > *state {
                trace!(from = %state, to = %next, "Relay state change");
                *state = next;
                true
            } else {
                false
            }
        });
    }

    async fn handle_request(&self, req: Request, work_tx: &mpsc::Sender<Assignment>) -> Result<()> {
        if req.is_login() {
            self.handle_login(req, work_tx).await
        } else {
            self.forward_to_pool(req).await
        }
    }

    async fn handle_login(&self, req: Request, work_tx: &mpsc::Sender<Assignment>) -> Result<()> {
        if self.current_state() != RelayState::AwaitingLogin {
            warn!(id = ?req.id, "Ignoring repeated login from assigned worker");
            return Ok(());
        }

        let name = match req.params.get_str("login") {
            Ok(name) => name.to_string(),
            Err(e) => {
                warn!(error = %e, "Malformed worker login");
                RelayStats::incr(&self.ctx.stats.lookup_failures);
                return self
                    .reply_error(req.id, ErrorCode::MalformedLogin, e.to_string())
                    .await;
            }
        };

        let assignment = match self.ctx.config.resolve(&name) {
            Ok((worker, pool)) => Assignment {
                pool: pool.clone(),
                worker: worker.clone(),
                login_id: req.id,
                login_params: req.params,
            },
            Err(e) => {
                error!(worker = %name, error = %e, "Could not look up worker login");
                RelayStats::incr(&self.ctx.stats.lookup_failures);
                let code = match &e {
                    LookupError::WorkerNotFound(_) => ErrorCode::UnknownWorker,
                    LookupError::PoolNotFound(_) => ErrorCode::UnknownPool,
                };
                return self.reply_error(req.id, code, e.to_string()).await;
            }
        };

        debug!(
            worker = %assignment.worker.username,
            pool = %assignment.pool.name,
            "Resolved worker login"
        );
        self.advance(RelayState::Assigned);
        work_tx
            .send(assignment)
            .await
            .map_err(|_| StratumError::Disconnected)?;
        Ok(())
    }

    async fn forward_to_pool(&self, req: Request) -> Result<()> {
        let mut pool = self.pool_sink.lock().await;
        match pool.as_mut() {
            Some(sink) => {
                trace!(id = ?req.id, method = %req.method, "Forwarding request to pool");
                sink.send(req.encode()?).await?;
            }
            None => {
                debug!(id = ?req.id, method = %req.method, "No pool assigned, dropping request");
            }
        }
        Ok(())
    }

    /// Open the assigned pool, send the login, and install the pool sink.
    async fn connect_pool(&self, assignment: &Assignment) -> Result<LineReader> {
        let pool = &assignment.pool;
        let stream = self.ctx.connector.connect(pool, &self.loop_token).await?;
        let (read_half, write_half) = stream.into_split();
        let max = self.ctx.max_line_length;
        let mut writer = FramedWrite::new(write_half, LineCodec::with_max_length(max));

        let login = create_login_request(
            pool.login_name(&assignment.worker.username),
            &pool.password,
            &assignment.login_params,
        )
        .with_id(assignment.login_id);
        writer.send(login.encode()?).await?;

        info!(
            worker = %assignment.worker.username,
            pool = %pool.name,
            "Successfully wrote login request to pool"
        );

        *self.pool_sink.lock().await = Some(writer);
        self.advance(RelayState::Relaying);
        Ok(FramedRead::new(read_half, LineCodec::with_max_length(max)))
    }

    async fn forward_reply(&self, resp: Response) -> Result<()> {
        trace!(id = ?resp.id, "Forwarding pool reply to worker");
        self.send_to_worker(&resp).await
    }

    // Pool-initiated calls (new jobs, difficulty changes) currently take the
    // same path as replies. Call-specific handling belongs here.
    async fn forward_call(&self, resp: Response) -> Result<()> {
        trace!(method = ?resp.method, "Forwarding pool call to worker");
        self.send_to_worker(&resp).await
    }

    async fn reply_error(&self, id: Option<i64>, code: ErrorCode, message: String) -> Result<()> {
        debug!(
            id = ?id,
            code = code.code(),
            message = %message,
            "Sending error response to worker"
        );
        self.send_to_worker(&Response::error_reply(id, code, message)).await
    }

    async fn send_to_worker(&self, resp: &Response) -> Result<()> {
        let frame = resp.encode()?;
        self.worker_sink.lock().await.send(frame).await?;
        Ok(())
    }

    /// Shut down both write halves without flushing. Frames still buffered
    /// are discarded, since a peer that stopped reading would never drain them.
    async fn close_sockets(&self) {
        if let Some(mut pool) = self.pool_sink.lock().await.take() {
            shutdown_write(pool.get_mut(), "pool").await;
        }
        shutdown_write(self.worker_sink.lock().await.get_mut(), "worker").await;
    }
}

async fn shutdown_write(half: &mut OwnedWriteHalf, side: &'static str) {
    match time::timeout(TEARDOWN_TIMEOUT, half.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(side, error = %e, "Error closing socket"),
        Err(_) => debug!(side, "Timed out closing socket"),
    }
}

/// Read worker lines, intercept the login, forward everything else.
async fn worker_listener(
    shared: Arc<Shared>,
    mut reader: LineReader,
    work_tx: mpsc::Sender<Assignment>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                debug!("Context closed, closing worker listener");
                break;
            }
            next = reader.next() => next,
        };

        let line = match next {
            None => {
                debug!("Worker closed connection");
                break;
            }
            Some(Err(e)) => {
                error!(error = %e, "Failed reading data from worker, shutting down event loop");
                break;
            }
            Some(Ok(line)) => line,
        };

        trace!(
            bytes = line.len(),
            payload = %String::from_utf8_lossy(&line),
            "Received worker payload"
        );

        let req = match Request::decode(&line) {
            Ok(req) => req,
            Err(e) => {
                warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(&line),
                    "Could not decode worker payload"
                );
                break;
            }
        };

        // A stalled pool must not hold off cancellation.
        let handled = tokio::select! {
            _ = token.cancelled() => break,
            handled = shared.handle_request(req, &work_tx) => handled,
        };
        if let Err(e) = handled {
            error!(error = %e, "Failed handling worker request");
            break;
        }
    }

    shared.loop_token.cancel();
}

/// Take the single assignment, connect the pool, start the pool listener.
async fn control(
    shared: Arc<Shared>,
    mut work_rx: mpsc::Receiver<Assignment>,
    tracker: TaskTracker,
) {
    let assignment = tokio::select! {
        _ = shared.loop_token.cancelled() => return,
        next = work_rx.recv() => match next {
            Some(assignment) => assignment,
            None => return,
        },
    };

    info!(
        worker = %assignment.worker.username,
        pool = %assignment.pool.name,
        "Received pool assignment, initializing pool proxy for connected worker"
    );

    match shared.connect_pool(&assignment).await {
        Ok(reader) => {
            RelayStats::incr(&shared.ctx.stats.assigned);
            let token = shared.loop_token.child_token();
            tracker.spawn(pool_listener(shared.clone(), reader, token).in_current_span());
        }
        Err(Error::Connect(ConnectError::Cancelled)) => {
            debug!("Pool connection cancelled");
        }
        Err(e) => {
            error!(pool = %assignment.pool.name, error = %e, "Could not connect to pool");
            RelayStats::incr(&shared.ctx.stats.pool_failures);
            let message = format!("pool '{}' unavailable", assignment.pool.name);
            let reply =
                shared.reply_error(assignment.login_id, ErrorCode::PoolUnavailable, message);
            tokio::select! {
                _ = shared.loop_token.cancelled() => {}
                replied = reply => {
                    if let Err(e) = replied {
                        debug!(error = %e, "Could not report pool failure to worker");
                    }
                }
            }
            shared.loop_token.cancel();
        }
    }
}

/// Read pool lines and forward them to the worker.
async fn pool_listener(shared: Arc<Shared>, mut reader: LineReader, token: CancellationToken) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                debug!("Context closed, closing pool listener");
                break;
            }
            next = reader.next() => next,
        };

        let line = match next {
            None => {
                warn!("Pool closed connection");
                break;
            }
            Some(Err(e)) => {
                error!(error = %e, "Failed reading data from pool, closing socket");
                break;
            }
            Some(Ok(line)) => line,
        };

        trace!(
            bytes = line.len(),
            payload = %String::from_utf8_lossy(&line),
            "Received pool payload"
        );

        let resp = match Response::decode(&line) {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(&line),
                    "Could not decode pool payload"
                );
                break;
            }
        };

        let forward = async {
            if resp.is_call() {
                shared.forward_call(resp).await
            } else {
                shared.forward_reply(resp).await
            }
        };
        let forwarded = tokio::select! {
            _ = token.cancelled() => break,
            forwarded = forward => forwarded,
        };
        if let Err(e) = forwarded {
            error!(error = %e, "Could not send response to worker");
            break;
        }
    }

    shared.loop_token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PoolRef};
    use crate::pool::PoolConnector;
    use bytes::Bytes;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Test side of a socket, speaking JSON lines.
    struct Peer {
        reader: LineReader,
        writer: LineWriter,
    }

    impl Peer {
        fn new(stream: TcpStream) -> Self {
            let (r, w) = stream.into_split();
            Self {
                reader: FramedRead::new(r, LineCodec::new()),
                writer: FramedWrite::new(w, LineCodec::new()),
            }
        }

        async fn send(&mut self, value: Value) {
            self.send_raw(format!("{}\n", value)).await;
        }

        async fn send_raw(&mut self, text: String) {
            self.writer.send(Bytes::from(text)).await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = timeout(WAIT, self.reader.next())
                .await
                .expect("timed out waiting for message")
                .expect("connection closed")
                .expect("read error");
            serde_json::from_slice(&line).unwrap()
        }

        async fn closed(&mut self) -> bool {
            matches!(
                timeout(WAIT, self.reader.next()).await,
                Ok(None) | Ok(Some(Err(_)))
            )
        }
    }

    struct Harness {
        worker: Peer,
        state: watch::Receiver<RelayState>,
        token: CancellationToken,
        handle: JoinHandle<()>,
        ctx: RelayContext,
    }

    fn config_for(pool_port: u16) -> Arc<Config> {
        let pools = vec![Pool {
            name: "p1".to_string(),
            address: format!("stratum+tcp://127.0.0.1:{}", pool_port),
            username: None,
            password: "secret".to_string(),
            timeout: 2,
        }];
        let workers = vec![
            Worker {
                username: "alice".to_string(),
                pool: PoolRef { name: "p1".to_string() },
            },
            Worker {
                username: "dangling".to_string(),
                pool: PoolRef { name: "nope".to_string() },
            },
        ];
        Arc::new(Config::new(pools, workers).unwrap())
    }

    async fn start(config: Arc<Config>) -> Harness {
        let ctx = RelayContext::new(config, PoolConnector::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let worker = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();

        let relay = ClientRelay::new(1, stream, peer, ctx.clone());
        let state = relay.subscribe();
        let token = CancellationToken::new();
        let handle = tokio::spawn(relay.run(token.clone()));

        Harness {
            worker: Peer::new(worker),
            state,
            token,
            handle,
            ctx,
        }
    }

    async fn accept_pool(listener: &TcpListener) -> Peer {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        Peer::new(stream)
    }

    async fn wait_state(state: &mut watch::Receiver<RelayState>, target: RelayState) {
        timeout(WAIT, state.wait_for(|s| *s == target))
            .await
            .expect("timed out waiting for state")
            .unwrap();
    }

    fn login(id: u64, name: &str) -> Value {
        json!({
            "id": id,
            "method": "login",
            "params": {"login": name, "pass": "x", "agent": "xmrig/6.21"}
        })
    }

    /// Log alice in and return the pool side, with the relay in Relaying.
    async fn logged_in(h: &mut Harness, pool_listener: &TcpListener) -> Peer {
        h.worker.send(login(1, "alice")).await;
        let mut pool = accept_pool(pool_listener).await;
        let login = pool.recv().await;
        assert_eq!(login["method"], "login");
        wait_state(&mut h.state, RelayState::Relaying).await;
        pool
    }

    #[tokio::test]
    async fn test_login_is_rewritten_for_pool() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;

        h.worker.send(login(1, "alice")).await;
        let mut pool = accept_pool(&pool_listener).await;
        let login = pool.recv().await;

        assert_eq!(login["id"], 1);
        assert_eq!(login["method"], "login");
        assert_eq!(login["params"]["login"], "alice");
        assert_eq!(login["params"]["pass"], "secret");
        assert_eq!(login["params"]["agent"], "xmrig/6.21");

        wait_state(&mut h.state, RelayState::Relaying).await;
        assert_eq!(h.ctx.stats.snapshot().assigned, 1);
    }

    #[tokio::test]
    async fn test_relays_both_directions_in_order() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;
        let mut pool = logged_in(&mut h, &pool_listener).await;

        pool.send(json!({
            "id": 1,
            "jsonrpc": "2.0",
            "error": null,
            "result": {"id": "sess", "status": "OK"}
        }))
            .await;
        let reply = h.worker.recv().await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["status"], "OK");

        for id in 2..=20u64 {
            h.worker
                .send(json!({
                    "id": id,
                    "method": "submit",
                    "params": {"id": "sess", "nonce": format!("{:08x}", id)}
                }))
                .await;
        }
        for id in 2..=20u64 {
            let req = pool.recv().await;
            assert_eq!(req["id"], id);
            assert_eq!(req["method"], "submit");
            assert_eq!(req["params"]["nonce"], format!("{:08x}", id));
        }

        pool.send(json!({
            "jsonrpc": "2.0",
            "method": "job",
            "params": {"job_id": "j2", "target": "b88d0600"}
        }))
            .await;
        let call = h.worker.recv().await;
        assert_eq!(call["method"], "job");
        assert_eq!(call["params"]["job_id"], "j2");
    }

    #[tokio::test]
    async fn test_unknown_worker_gets_error_and_may_retry() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;

        h.worker.send(login(1, "mallory")).await;
        let reply = h.worker.recv().await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["error"]["code"], ErrorCode::UnknownWorker.code());
        assert_eq!(*h.state.borrow(), RelayState::AwaitingLogin);

        h.worker.send(login(2, "dangling")).await;
        let reply = h.worker.recv().await;
        assert_eq!(reply["error"]["code"], ErrorCode::UnknownPool.code());

        h.worker.send(json!({"id": 3, "method": "login", "params": {"pass": "x"}})).await;
        let reply = h.worker.recv().await;
        assert_eq!(reply["error"]["code"], ErrorCode::MalformedLogin.code());

        assert!(timeout(Duration::from_millis(100), pool_listener.accept())
            .await
            .is_err());
        assert_eq!(h.ctx.stats.snapshot().lookup_failures, 3);

        h.worker.send(login(4, "alice")).await;
        let mut pool = accept_pool(&pool_listener).await;
        assert_eq!(pool.recv().await["id"], 4);
    }

    #[tokio::test]
    async fn test_requests_before_login_are_dropped() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;

        h.worker.send(json!({"id": 9, "method": "keepalived", "params": {}})).await;
        let mut pool = logged_in(&mut h, &pool_listener).await;

        h.worker.send(json!({"id": 10, "method": "keepalived", "params": {}})).await;
        assert_eq!(pool.recv().await["id"], 10);
    }

    #[tokio::test]
    async fn test_second_login_is_ignored() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;
        let mut pool = logged_in(&mut h, &pool_listener).await;

        h.worker.send(login(5, "alice")).await;
        h.worker.send(json!({"id": 6, "method": "submit", "params": {}})).await;

        let next = pool.recv().await;
        assert_eq!(next["id"], 6);
        assert_eq!(next["method"], "submit");
        assert!(timeout(Duration::from_millis(100), pool_listener.accept())
            .await
            .is_err());
        assert_eq!(*h.state.borrow(), RelayState::Relaying);
    }

    #[tokio::test]
    async fn test_pool_unreachable_reports_and_closes() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let mut h = start(config_for(port)).await;

        h.worker.send(login(1, "alice")).await;
        let reply = h.worker.recv().await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["error"]["code"], ErrorCode::PoolUnavailable.code());

        assert!(h.worker.closed().await);
        timeout(WAIT, h.handle).await.unwrap().unwrap();
        assert_eq!(*h.state.borrow(), RelayState::Closed);
        assert_eq!(h.ctx.stats.snapshot().pool_failures, 1);
    }

    #[tokio::test]
    async fn test_worker_disconnect_closes_pool() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;
        let mut pool = logged_in(&mut h, &pool_listener).await;

        drop(h.worker);
        assert!(pool.closed().await);
        timeout(WAIT, h.handle).await.unwrap().unwrap();

        let stats = h.ctx.stats.snapshot();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.closed, 1);
    }

    #[tokio::test]
    async fn test_pool_disconnect_closes_worker() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;
        let pool = logged_in(&mut h, &pool_listener).await;

        drop(pool);
        assert!(h.worker.closed().await);
        timeout(WAIT, h.handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_closes_both_sockets() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;
        let mut pool = logged_in(&mut h, &pool_listener).await;

        h.token.cancel();
        assert!(h.worker.closed().await);
        assert!(pool.closed().await);
        timeout(WAIT, h.handle).await.unwrap().unwrap();
        assert_eq!(*h.state.borrow(), RelayState::Closed);
    }

    #[tokio::test]
    async fn test_cancel_with_stalled_pool() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;
        // Accepted, logged in, and never read again.
        let _stalled_pool = logged_in(&mut h, &pool_listener).await;

        let Harness {
            worker,
            state,
            token,
            handle,
            ctx,
        } = h;
        let Peer {
            reader: _worker_reader,
            mut writer,
        } = worker;

        let line = format!(
            "{}\n",
            json!({"id": 2, "method": "submit", "params": {"blob": "f".repeat(60_000)}})
        );
        let flood = tokio::spawn(async move {
            for _ in 0..1000 {
                if writer.send(Bytes::from(line.clone())).await.is_err() {
                    break;
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        token.cancel();

        timeout(WAIT, handle)
            .await
            .expect("relay did not stop after cancel")
            .unwrap();
        assert_eq!(*state.borrow(), RelayState::Closed);
        assert_eq!(ctx.stats.snapshot().active, 0);
        flood.abort();
    }

    #[tokio::test]
    async fn test_malformed_worker_payload_closes_relay() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;
        let mut pool = logged_in(&mut h, &pool_listener).await;

        h.worker.send_raw("{\"id\":2,\"method\":\n".to_string()).await;
        assert!(h.worker.closed().await);
        assert!(pool.closed().await);
        timeout(WAIT, h.handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_partial_lines_are_reassembled() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut h = start(config_for(pool_listener.local_addr().unwrap().port())).await;
        let mut pool = logged_in(&mut h, &pool_listener).await;

        let text = json!({"id": 2, "method": "submit", "params": {"result": "ab".repeat(300)}})
            .to_string();
        for chunk in text.as_bytes().chunks(64) {
            h.worker.send_raw(String::from_utf8(chunk.to_vec()).unwrap()).await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        h.worker.send_raw("\r\n".to_string()).await;

        let req = pool.recv().await;
        assert_eq!(req["id"], 2);
        assert_eq!(req["params"]["result"].as_str().unwrap().len(), 600);
    }
}
