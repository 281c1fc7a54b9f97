//! Protocol-independent connection core.
//!
//! [`ClientConn`] owns one logical connection: the current transport, the
//! read loop decoding frames from it, and redial with backoff when it dies.
//! What a frame looks like is up to the [`FrameCodec`]; what happens to a
//! decoded frame is up to the [`Dispatcher`].
//!
//! Read deadlines:
//! - while a frame is partially buffered, `read_timeout` applies and expiry
//!   tears the connection down
//! - between frames, `idle_timeout` applies and expiry only moves the
//!   status to [`ConnStatus::ReadTimeout`]
//!
//! Work returned by [`Dispatcher::dispatch`] runs on the read loop, so no
//! further frame is decoded until it completes.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use sofabolt_conn::{
    read_with_deadline, AsyncStream, AsyncWriter, BoxStream, ConnError, HandlerFuture,
    MeteredStream, WriteHandle,
};
use sofabolt_protocol::{Decoder, ProtocolError};
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dialer::Dialer;
use crate::error::ClientError;
use crate::metrics::ClientMetrics;
use crate::status::{ConnStatus, StatusCell};

/// Frame encoding for a [`ClientConn`].
pub trait FrameCodec: Send + Sync + 'static {
    type Frame: Send + 'static;

    fn encode(&self, frame: &mut Self::Frame, dst: &mut BytesMut) -> Result<(), ProtocolError>;

    /// Takes one frame off the front of `src`, or returns `None` until a
    /// whole frame is buffered.
    fn decode(&self, src: &mut Decoder) -> Result<Option<Self::Frame>, ProtocolError>;
}

/// Receives decoded frames on the read loop.
pub trait Dispatcher<F>: Send + Sync + 'static {
    /// `writer` writes to the connection the frame arrived on. Returned
    /// work is awaited before the next frame is decoded.
    fn dispatch(&self, writer: &WriteHandle, frame: F) -> Option<HandlerFuture>;

    /// The connection died with `err`.
    fn on_disconnect(&self, err: &ClientError);
}

struct Inner<C, D> {
    codec: C,
    dispatcher: D,
    config: ClientConfig,
    dialer: Option<Arc<dyn Dialer>>,
    writer: RwLock<WriteHandle>,
    status: StatusCell,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
    terminal: Mutex<Option<ClientError>>,
    metrics: Arc<ClientMetrics>,
    next_id: AtomicU64,
}

/// A multiplexed connection with its read loop.
pub struct ClientConn<C, D> {
    inner: Arc<Inner<C, D>>,
}

impl<C, D> Clone for ClientConn<C, D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C, D> ClientConn<C, D>
where
    C: FrameCodec,
    D: Dispatcher<C::Frame>,
{
    fn build(
        codec: C,
        dispatcher: D,
        config: ClientConfig,
        dialer: Option<Arc<dyn Dialer>>,
        writer: WriteHandle,
    ) -> Arc<Inner<C, D>> {
        let (close_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);
        Arc::new(Inner {
            codec,
            dispatcher,
            config,
            dialer,
            writer: RwLock::new(writer),
            status: StatusCell::new(),
            closed: AtomicBool::new(false),
            close_tx,
            done_tx,
            terminal: Mutex::new(None),
            metrics: Arc::new(ClientMetrics::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Dials with `dialer` and starts the read loop. A failed first dial
    /// does not fail here: the read loop redials until it succeeds or the
    /// connection is closed.
    pub async fn connect(
        dialer: impl Dialer,
        codec: C,
        dispatcher: D,
        config: ClientConfig,
    ) -> Self {
        let dialer: Arc<dyn Dialer> = Arc::new(dialer);
        let pending = WriteHandle::closed(ConnError::Closed("connecting".into()));
        let inner = Self::build(codec, dispatcher, config, Some(dialer.clone()), pending);
        inner.set_status(ConnStatus::Connecting);

        let (stream, dial_err) = match dialer.dial().await {
            Ok(stream) => (Some(stream), None),
            Err(e) => {
                warn!("Initial dial failed: {}", e);
                let err = ClientError::from(e);
                *inner.writer.write() = WriteHandle::closed(ConnError::Closed(err.to_string()));
                (None, Some(err))
            }
        };
        tokio::spawn(inner.clone().run(stream, dial_err));
        Self { inner }
    }

    /// Runs over an established transport. The connection is never redialed.
    pub fn from_stream(stream: impl AsyncStream, codec: C, dispatcher: D, config: ClientConfig) -> Self {
        let pending = WriteHandle::closed(ConnError::Closed("connecting".into()));
        let inner = Self::build(codec, dispatcher, config, None, pending);
        let stream: BoxStream = Box::new(stream);
        tokio::spawn(inner.clone().run(Some(stream), None));
        Self { inner }
    }

    /// Encodes `frame` and queues it on the current transport.
    pub async fn send(&self, frame: &mut C::Frame) -> Result<(), ClientError> {
        let mut buf = BytesMut::new();
        self.inner.codec.encode(frame, &mut buf)?;
        self.write(buf.freeze()).await
    }

    /// Queues encoded bytes on the current transport.
    pub async fn write(&self, data: Bytes) -> Result<(), ClientError> {
        let writer = self.writer();
        writer.write(data).await.map_err(ClientError::from)
    }

    /// Writer of the current transport.
    pub fn writer(&self) -> WriteHandle {
        self.inner.writer.read().clone()
    }

    /// Stops the read loop. Queued writes are still flushed.
    pub fn close(&self) -> Result<(), ClientError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(ClientError::Closed);
        }
        debug!("Closing client connection");
        self.inner.close_tx.send_replace(true);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Waits until the read loop has terminated for good.
    pub async fn closed(&self) {
        let mut rx = self.inner.done_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn status(&self) -> ConnStatus {
        self.inner.status.get()
    }

    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.inner.metrics
    }

    /// Error that terminated the read loop, once it has.
    pub fn terminal_error(&self) -> Option<ClientError> {
        self.inner.terminal.lock().clone()
    }

    pub fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    pub fn dispatcher(&self) -> &D {
        &self.inner.dispatcher
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl<C, D> Inner<C, D>
where
    C: FrameCodec,
    D: Dispatcher<C::Frame>,
{
    fn set_status(&self, to: ConnStatus) {
        if let Some(from) = self.status.transition(to) {
            debug!("Connection status {} -> {}", from, to);
            if let Some(listener) = &self.config.status_listener {
                listener.on_status_change(from, to);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn run(self: Arc<Self>, mut stream: Option<BoxStream>, mut dial_err: Option<ClientError>) {
        let mut close_rx = self.close_tx.subscribe();
        loop {
            let err = match stream.take() {
                Some(s) => self.serve(s, &mut close_rx).await,
                None => dial_err.take().unwrap_or(ClientError::Closed),
            };
            debug!("Connection lost: {}", err);
            self.set_status(ConnStatus::TransientFailure);

            if self.is_closed() || self.dialer.is_none() {
                self.finish(err);
                return;
            }
            self.dispatcher.on_disconnect(&err);

            match self.redial(&mut close_rx).await {
                Some(s) => {
                    info!("Redial succeeded");
                    stream = Some(s);
                }
                None => {
                    self.finish(err);
                    return;
                }
            }
        }
    }

    fn finish(&self, err: ClientError) {
        self.closed.store(true, Ordering::Release);
        *self.terminal.lock() = Some(err.clone());
        self.dispatcher.on_disconnect(&err);
        self.set_status(ConnStatus::Shutdown);
        self.done_tx.send_replace(true);
    }

    async fn serve(&self, stream: BoxStream, close_rx: &mut watch::Receiver<bool>) -> ClientError {
        let metered = MeteredStream::new(stream, self.metrics.byte_counters().clone());
        let (mut reader, writer) = tokio::io::split(metered);
        let (handle, _join) = AsyncWriter::spawn(
            writer,
            self.config.writer_config(),
            self.metrics.writer_metrics().clone(),
        );
        *self.writer.write() = handle.clone();
        self.set_status(ConnStatus::Active);

        let err = self.read_frames(&mut reader, &handle, close_rx).await;

        *self.writer.write() = WriteHandle::closed(ConnError::Closed(err.to_string()));
        handle.shutdown();
        err
    }

    async fn read_frames<R>(
        &self,
        reader: &mut R,
        writer: &WriteHandle,
        close_rx: &mut watch::Receiver<bool>,
    ) -> ClientError
    where
        R: AsyncRead + Unpin,
    {
        let mut decoder = Decoder::new();
        loop {
            loop {
                let frame = match self.codec.decode(&mut decoder) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to decode frame: {}", e);
                        return e.into();
                    }
                };
                if let Some(work) = self.dispatcher.dispatch(writer, frame) {
                    tokio::select! {
                        biased;
                        _ = close_rx.wait_for(|closed| *closed) => return ClientError::Closed,
                        _ = work => {}
                    }
                }
            }

            let partial = !decoder.is_empty();
            let timeout = if partial {
                self.config.read_timeout
            } else {
                self.config.idle_timeout
            };

            let read = tokio::select! {
                biased;
                _ = close_rx.wait_for(|closed| *closed) => return ClientError::Closed,
                r = read_with_deadline(reader, decoder.buffer_mut(), timeout) => r,
            };
            match read {
                Ok(Some(0)) => {
                    return io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer")
                        .into();
                }
                Ok(Some(_)) => self.set_status(ConnStatus::Active),
                Ok(None) if !partial => self.set_status(ConnStatus::ReadTimeout),
                Ok(None) => {
                    return io::Error::new(io::ErrorKind::TimedOut, "read timeout").into();
                }
                Err(e) => return e.into(),
            }
        }
    }

    async fn redial(&self, close_rx: &mut watch::Receiver<bool>) -> Option<BoxStream> {
        let dialer = self.dialer.as_ref()?;
        self.set_status(ConnStatus::Connecting);
        let mut attempt = 0u32;
        loop {
            if self.is_closed() {
                return None;
            }
            let delay = self.config.redial_backoff.delay(attempt);
            attempt = attempt.saturating_add(1);

            let dialed = tokio::select! {
                biased;
                _ = close_rx.wait_for(|closed| *closed) => return None,
                r = async {
                    tokio::time::sleep(delay).await;
                    dialer.dial().await
                } => r,
            };
            match dialed {
                Ok(stream) => return Some(stream),
                Err(e) => debug!("Redial attempt {} failed: {}", attempt, e),
            }
        }
    }
}
