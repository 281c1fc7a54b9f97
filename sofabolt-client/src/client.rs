//! BOLT client.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::BytesMut;
use sofabolt_conn::{derive_response, AsyncStream};
use sofabolt_protocol::{CmdType, Request, Response};
use tracing::{debug, warn};

use crate::bolt::{BoltCodec, BoltDispatcher, PendingTable};
use crate::config::{ClientConfig, HeartbeatConfig};
use crate::conn::ClientConn;
use crate::dialer::Dialer;
use crate::error::ClientError;
use crate::invoke::{CallResult, Completion, InvokeContext};
use crate::metrics::ClientMetrics;
use crate::status::ConnStatus;

type BoltConn = ClientConn<BoltCodec, BoltDispatcher>;

struct ClientInner {
    conn: BoltConn,
    pending: Arc<PendingTable>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let _ = self.conn.close();
    }
}

/// A multiplexing BOLT client.
///
/// Cheap to clone; all clones share one connection. The connection is
/// closed when the last clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Dials the server. The connection is redialed whenever it dies,
    /// including when this first dial fails.
    pub async fn connect(dialer: impl Dialer, config: ClientConfig) -> Self {
        let pending = Arc::new(PendingTable::new());
        let codec = BoltCodec::new(config.connection_codec.clone());
        let dispatcher = BoltDispatcher::new(pending.clone(), config.handler.clone())
            .with_async_dispatch(config.async_dispatch);
        let conn = ClientConn::connect(dialer, codec, dispatcher, config).await;
        Self::start(conn, pending)
    }

    /// Runs over an established stream, without redial.
    pub fn from_stream(stream: impl AsyncStream, config: ClientConfig) -> Self {
        let pending = Arc::new(PendingTable::new());
        let codec = BoltCodec::new(config.connection_codec.clone());
        let dispatcher = BoltDispatcher::new(pending.clone(), config.handler.clone())
            .with_async_dispatch(config.async_dispatch);
        let conn = ClientConn::from_stream(stream, codec, dispatcher, config);
        Self::start(conn, pending)
    }

    fn start(conn: BoltConn, pending: Arc<PendingTable>) -> Self {
        let heartbeat = conn.config().heartbeat.clone();
        let client = Self {
            inner: Arc::new(ClientInner { conn, pending }),
        };
        if heartbeat.is_enabled() {
            tokio::spawn(heartbeat_loop(Arc::downgrade(&client.inner), heartbeat));
        }
        client
    }

    /// Sends `req` and waits for its response without a deadline.
    pub async fn invoke(&self, req: &mut Request) -> Result<Response, ClientError> {
        self.invoke_timeout(req, Duration::ZERO).await
    }

    /// Sends `req` and waits up to `timeout` for its response. Zero waits
    /// indefinitely.
    ///
    /// With auto-increment enabled the request id is overwritten. One-way
    /// requests resolve as soon as they are written.
    pub async fn invoke_timeout(
        &self,
        req: &mut Request,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let auto_id = self.inner.conn.config().auto_increment_request_id;
        let metrics = self.inner.conn.metrics();
        metrics.begin_call();
        let result = self.call(req, timeout, auto_id).await;
        metrics.end_call();
        result
    }

    /// Sends `req` and returns once it is written; `callback` later receives
    /// the response, the connection error, or [`ClientError::Timeout`].
    ///
    /// Errors returned here mean the call never started and `callback` is
    /// not run.
    pub async fn invoke_callback<F>(
        &self,
        req: &mut Request,
        timeout: Duration,
        callback: F,
    ) -> Result<(), ClientError>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        let auto_id = self.inner.conn.config().auto_increment_request_id;
        let metrics = self.inner.conn.metrics();
        metrics.begin_call();
        let result = self.call_back(req, timeout, auto_id, Box::new(callback)).await;
        metrics.end_call();
        result
    }

    async fn call(
        &self,
        req: &mut Request,
        timeout: Duration,
        auto_id: bool,
    ) -> Result<Response, ClientError> {
        let (frame, id) = self.prepare(req, auto_id)?;

        if req.cmd_type() == CmdType::REQUEST_ONEWAY {
            self.inner.conn.write(frame.freeze()).await?;
            return Ok(derive_response(req));
        }

        let (ctx, rx) = InvokeContext::channel(id, req.cmdcode(), timeout);
        self.register(ctx)?;
        if let Err(e) = self.inner.conn.write(frame.freeze()).await {
            self.inner.pending.remove(id);
            return Err(e);
        }

        let received = if timeout.is_zero() {
            rx.await
        } else {
            match tokio::time::timeout(timeout, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.inner.pending.remove(id);
                    return Err(ClientError::Timeout);
                }
            }
        };
        received.unwrap_or(Err(ClientError::Closed))
    }

    async fn call_back(
        &self,
        req: &mut Request,
        timeout: Duration,
        auto_id: bool,
        callback: Box<dyn FnOnce(CallResult) + Send>,
    ) -> Result<(), ClientError> {
        let (frame, id) = self.prepare(req, auto_id)?;

        if req.cmd_type() == CmdType::REQUEST_ONEWAY {
            self.inner.conn.write(frame.freeze()).await?;
            callback(Ok(derive_response(req)));
            return Ok(());
        }

        let ctx = InvokeContext::new(id, req.cmdcode(), timeout, Completion::Callback(callback));
        self.register(ctx)?;
        if let Err(e) = self.inner.conn.write(frame.freeze()).await {
            self.inner.pending.remove(id);
            return Err(e);
        }

        if !timeout.is_zero() {
            let pending = self.inner.pending.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(ctx) = pending.remove(id) {
                    ctx.complete(Err(ClientError::Timeout));
                }
            });
        }
        Ok(())
    }

    /// Validates `req`, assigns its id and encodes it.
    fn prepare(&self, req: &mut Request, auto_id: bool) -> Result<(BytesMut, u32), ClientError> {
        let conn = &self.inner.conn;
        if conn.is_closed() {
            return Err(ClientError::Closed);
        }
        if let Some(err) = conn.terminal_error() {
            return Err(err);
        }
        let typ = req.cmd_type();
        if typ != CmdType::REQUEST && typ != CmdType::REQUEST_ONEWAY {
            return Err(ClientError::NotARequest);
        }

        if auto_id {
            let id = loop {
                let id = conn.next_id() as u32;
                if !self.inner.pending.contains(id) {
                    break id;
                }
            };
            req.set_request_id(id);
        }

        let mut frame = BytesMut::with_capacity(req.size());
        conn.codec().encode_request(req, &mut frame)?;
        Ok((frame, req.request_id()))
    }

    fn register(&self, ctx: InvokeContext) -> Result<(), ClientError> {
        let id = ctx.request_id();
        if self.inner.pending.insert(ctx).is_err() {
            return Err(ClientError::DuplicateRequestId(id));
        }
        // Teardown may have drained the table before the insert.
        if self.inner.conn.is_closed() {
            self.inner.pending.remove(id);
            return Err(self.inner.conn.terminal_error().unwrap_or(ClientError::Closed));
        }
        Ok(())
    }

    /// Stops the connection. Pending calls fail with [`ClientError::Closed`].
    pub fn close(&self) -> Result<(), ClientError> {
        self.inner.conn.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.conn.is_closed()
    }

    /// Waits until the connection has shut down.
    pub async fn closed(&self) {
        self.inner.conn.closed().await
    }

    pub fn status(&self) -> ConnStatus {
        self.inner.conn.status()
    }

    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        self.inner.conn.metrics()
    }

    pub fn terminal_error(&self) -> Option<ClientError> {
        self.inner.conn.terminal_error()
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn config(&self) -> &ClientConfig {
        self.inner.conn.config()
    }
}

async fn heartbeat_loop(inner: Weak<ClientInner>, config: HeartbeatConfig) {
    let mut failures = 0usize;
    loop {
        tokio::time::sleep(config.interval).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.conn.is_closed() {
            return;
        }
        let client = Client { inner };

        let mut req = Request::heartbeat();
        match client.call(&mut req, config.timeout, true).await {
            Ok(_) => {
                failures = 0;
                if let Some(listener) = &config.listener {
                    listener(true);
                }
            }
            Err(e) => {
                failures += 1;
                debug!("Heartbeat failed ({} in a row): {}", failures, e);
                if failures > config.probes {
                    if let Some(listener) = &config.listener {
                        listener(false);
                    }
                    if config.probes > 0 {
                        warn!("Heartbeat gave up after {} failures", failures);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sofabolt_protocol::{CmdCode, Command, Status};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn read_command(peer: &mut DuplexStream, buf: &mut BytesMut) -> Command {
        loop {
            let mut cmd = Command::new();
            match cmd.read(buf) {
                Ok(n) => {
                    let _ = buf.split_to(n);
                    return cmd;
                }
                Err(_) => {
                    peer.read_buf(buf).await.unwrap();
                }
            }
        }
    }

    async fn reply(peer: &mut DuplexStream, rid: u32, content: &[u8]) {
        let mut res = Response::new();
        res.set_request_id(rid).set_content(content);
        let mut out = BytesMut::new();
        res.write(&mut out).unwrap();
        peer.write_all(&out).await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let (local, mut peer) = tokio::io::duplex(64 * 1024);
        let client = Client::from_stream(local, ClientConfig::default());

        let server = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            let cmd = read_command(&mut peer, &mut buf).await;
            assert_eq!(cmd.content(), b"ping");
            reply(&mut peer, cmd.request_id(), b"pong").await;
            peer
        });

        let mut req = Request::new();
        req.set_content(b"ping");
        let res = client
            .invoke_timeout(&mut req, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(res.content(), b"pong");
        assert_eq!(res.request_id(), req.request_id());
        assert_eq!(client.pending_calls(), 0);
        assert_eq!(client.metrics().used(), 1);
        assert_eq!(client.metrics().references(), 0);
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_rejects_response_type() {
        let (local, _peer) = tokio::io::duplex(1024);
        let client = Client::from_stream(local, ClientConfig::default());
        let mut req = Request::new();
        req.set_cmd_type(CmdType::RESPONSE);
        assert!(matches!(
            client.invoke(&mut req).await,
            Err(ClientError::NotARequest)
        ));
    }

    #[tokio::test]
    async fn test_invoke_timeout_clears_pending() {
        let (local, _peer) = tokio::io::duplex(64 * 1024);
        let client = Client::from_stream(local, ClientConfig::default());
        let mut req = Request::new();
        let err = client
            .invoke_timeout(&mut req, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_oneway_returns_derived_response() {
        let (local, mut peer) = tokio::io::duplex(64 * 1024);
        let client = Client::from_stream(local, ClientConfig::default());
        let mut req = Request::new();
        req.set_cmd_type(CmdType::REQUEST_ONEWAY).set_content(b"fire");
        let res = client.invoke(&mut req).await.unwrap();
        assert_eq!(res.request_id(), req.request_id());
        assert_eq!(res.cmdcode(), CmdCode::RESPONSE);
        assert_eq!(res.status(), Status::SUCCESS);
        assert_eq!(client.pending_calls(), 0);

        let mut buf = BytesMut::new();
        let cmd = read_command(&mut peer, &mut buf).await;
        assert_eq!(cmd.cmd_type(), CmdType::REQUEST_ONEWAY);
        assert_eq!(cmd.content(), b"fire");
    }

    #[tokio::test]
    async fn test_duplicate_manual_id() {
        let (local, _peer) = tokio::io::duplex(64 * 1024);
        let config = ClientConfig::default().with_auto_increment_request_id(false);
        let client = Client::from_stream(local, config);

        let first = client.clone();
        let waiting = tokio::spawn(async move {
            let mut req = Request::new();
            req.set_request_id(7);
            first.invoke_timeout(&mut req, Duration::from_millis(300)).await
        });
        while client.pending_calls() == 0 {
            tokio::task::yield_now().await;
        }

        let mut req = Request::new();
        req.set_request_id(7);
        assert!(matches!(
            client.invoke(&mut req).await,
            Err(ClientError::DuplicateRequestId(7))
        ));
        assert!(matches!(
            waiting.await.unwrap(),
            Err(ClientError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_callback_receives_response() {
        let (local, mut peer) = tokio::io::duplex(64 * 1024);
        let client = Client::from_stream(local, ClientConfig::default());
        let (tx, rx) = tokio::sync::oneshot::channel();

        let mut req = Request::new();
        client
            .invoke_callback(&mut req, Duration::from_secs(5), move |result| {
                let _ = tx.send(result);
            })
            .await
            .unwrap();

        let mut buf = BytesMut::new();
        let cmd = read_command(&mut peer, &mut buf).await;
        reply(&mut peer, cmd.request_id(), b"later").await;
        assert_eq!(rx.await.unwrap().unwrap().content(), b"later");
    }

    #[tokio::test]
    async fn test_close_rejects_new_calls() {
        let (local, _peer) = tokio::io::duplex(1024);
        let client = Client::from_stream(local, ClientConfig::default());
        client.close().unwrap();
        assert!(matches!(client.close(), Err(ClientError::Closed)));
        client.closed().await;
        assert_eq!(client.status(), ConnStatus::Shutdown);
        let mut req = Request::new();
        assert!(matches!(
            client.invoke(&mut req).await,
            Err(ClientError::Closed)
        ));
    }
}
