//! Per-connection serving loop.
//!
//! Requests are decoded off the read half one at a time. In sync mode each
//! handler runs inline and the next request is not decoded until it
//! returns; in async mode each handler gets its own task, bounded by
//! `max_pending_commands` per connection. Responses from either mode go
//! through one [`AsyncWriter`] per connection.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use sofabolt_conn::{
    derive_response, read_with_deadline, AsyncWriter, BoxStream, ConnState, Handler, Hijacked,
    ResponseWriter, StateCell, WriteHandle, WriterMetrics, WriterWatch,
};
use sofabolt_protocol::{CmdType, Decoder, Request, CLASS_RESPONSE};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServerError;
use crate::metrics::ServerMetrics;
use crate::server::ServerConfig;

/// How a served connection ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnOutcome {
    Closed,
    /// A handler took the transport.
    Hijacked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseMode {
    Open,
    /// Stop reading, let in-flight handlers finish.
    Graceful,
    /// Stop reading, abort in-flight handlers.
    Force,
}

/// Registry entry of one open connection.
pub(crate) struct Connection {
    id: Uuid,
    peer: Option<SocketAddr>,
    state: StateCell,
    in_flight: AtomicUsize,
    close_tx: watch::Sender<CloseMode>,
}

impl Connection {
    pub(crate) fn new(peer: Option<SocketAddr>) -> Arc<Self> {
        let (close_tx, _) = watch::channel(CloseMode::Open);
        Arc::new(Self {
            id: Uuid::new_v4(),
            peer,
            state: StateCell::new(),
            in_flight: AtomicUsize::new(0),
            close_tx,
        })
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub(crate) fn state(&self) -> ConnState {
        self.state.state()
    }

    fn label(&self) -> String {
        match self.peer {
            Some(addr) => addr.to_string(),
            None => self.id.to_string(),
        }
    }

    /// Nothing in flight and either idle between frames, or connected
    /// without sending anything for at least `threshold`.
    pub(crate) fn is_quiescent(&self, threshold: Duration) -> bool {
        if self.in_flight.load(Ordering::Acquire) > 0 {
            return false;
        }
        match self.state.state() {
            ConnState::Idle => true,
            ConnState::New => self.state.since_change() >= threshold,
            _ => false,
        }
    }

    pub(crate) fn close(&self, mode: CloseMode) {
        self.close_tx.send_if_modified(|current| {
            if *current == CloseMode::Force || *current == mode {
                return false;
            }
            *current = mode;
            true
        });
    }
}

/// What every connection of a server shares.
pub(crate) struct ConnContext {
    pub(crate) config: ServerConfig,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) metrics: ServerMetrics,
}

/// Serves `stream` until the peer leaves, an error occurs, the connection
/// is closed from the registry, or a handler hijacks it.
///
/// A forced close also interrupts a running sync handler and a wait for a
/// dispatch permit.
pub(crate) async fn serve(
    stream: BoxStream,
    conn: Arc<Connection>,
    ctx: Arc<ConnContext>,
) -> Result<ConnOutcome, ServerError> {
    let (mut reader, write_half) = tokio::io::split(stream);
    let (writer, join) = AsyncWriter::spawn(
        write_half,
        ctx.config.writer_config(),
        Arc::new(WriterMetrics::new()),
    );
    let mut close_rx = conn.close_tx.subscribe();
    let mut decoder = match &ctx.config.connection_codec {
        Some(codec) => Decoder::new().with_connection_codec(codec.clone()),
        None => Decoder::new(),
    };
    let mut tasks = JoinSet::new();
    let permits = Arc::new(Semaphore::new(ctx.config.max_pending_commands.max(1)));
    let mut requests = 0u64;

    let result: Result<Option<WriterWatch>, ServerError> = 'serve: loop {
        loop {
            let before = decoder.buffered();
            let req = match decoder.decode_request() {
                Ok(Some(req)) => req,
                Ok(None) => break,
                Err(e) => break 'serve Err(e.into()),
            };
            requests += 1;
            ctx.metrics.add_bytes_read(before - decoder.buffered());

            let typ = req.cmd_type();
            if typ != CmdType::REQUEST && typ != CmdType::REQUEST_ONEWAY {
                break 'serve Err(ServerError::NotARequest);
            }

            if ctx.config.async_dispatch {
                let acquired = tokio::select! {
                    biased;
                    _ = forced(&mut close_rx) => None,
                    permit = permits.clone().acquire_owned() => Some(permit),
                };
                let permit = match acquired {
                    Some(Ok(permit)) => permit,
                    Some(Err(_)) => break 'serve Err(ServerError::ShuttingDown),
                    None => break 'serve Ok(None),
                };
                conn.in_flight.fetch_add(1, Ordering::AcqRel);
                let (ctx, writer, conn) = (ctx.clone(), writer.clone(), conn.clone());
                tasks.spawn(async move {
                    run_handler(&ctx, &writer, req, false).await;
                    conn.in_flight.fetch_sub(1, Ordering::AcqRel);
                    drop(permit);
                });
            } else {
                conn.in_flight.fetch_add(1, Ordering::AcqRel);
                let served = tokio::select! {
                    biased;
                    _ = forced(&mut close_rx) => None,
                    hijacked = run_handler(&ctx, &writer, req, true) => Some(hijacked),
                };
                conn.in_flight.fetch_sub(1, Ordering::AcqRel);
                match served {
                    Some(None) => {}
                    Some(hijacked) => break 'serve Ok(hijacked),
                    None => break 'serve Ok(None),
                }
            }
        }

        // Reap finished async handlers.
        while tasks.try_join_next().is_some() {}

        let partial = !decoder.is_empty();
        if !partial {
            conn.state.set(ConnState::Idle);
        }
        let timeout = if requests < 2 || partial {
            ctx.config.read_timeout
        } else {
            ctx.config.idle_timeout
        };

        let read = tokio::select! {
            biased;
            _ = closing(&mut close_rx) => None,
            r = read_with_deadline(&mut reader, decoder.buffer_mut(), timeout) => Some(r),
        };
        let Some(read) = read else {
            break Ok(None);
        };
        match read {
            Ok(Some(0)) if partial => {
                break Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )
                .into());
            }
            Ok(Some(0)) => {
                debug!("[{}] Connection closed by client", conn.label());
                break Ok(None);
            }
            Ok(Some(n)) => {
                conn.state.set(ConnState::Active);
                debug!("[{}] Received {} bytes", conn.label(), n);
            }
            Ok(None) => break Err(ServerError::ReadTimeout),
            Err(e) => break Err(e.into()),
        }
    };

    let force = *close_rx.borrow() == CloseMode::Force;
    if force {
        debug!("[{}] Closing forcibly", conn.label());
        tasks.abort_all();
    }
    while tasks.join_next().await.is_some() {}
    writer.shutdown();
    if force {
        join.abort();
    }

    match result {
        Ok(Some(watch)) => {
            conn.state.set(ConnState::Hijacked);
            let write_half = join
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let hijacked = Hijacked {
                stream: reader.unsplit(write_half),
                buffered: decoder.take_remaining(),
            };
            if watch.complete_hijack(hijacked).is_err() {
                debug!("[{}] Hijacker went away, dropping transport", conn.label());
            }
            Ok(ConnOutcome::Hijacked)
        }
        Ok(None) => {
            let _ = join.await;
            conn.state.set(ConnState::Closed);
            Ok(ConnOutcome::Closed)
        }
        Err(e) => {
            let _ = join.await;
            conn.state.set(ConnState::Closed);
            Err(e)
        }
    }
}

/// Ends the command when dropped, including when the handler task is aborted.
struct CommandGuard<'a>(&'a ServerMetrics);

impl<'a> CommandGuard<'a> {
    fn begin(metrics: &'a ServerMetrics) -> Self {
        metrics.begin_command();
        Self(metrics)
    }
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        self.0.end_command();
    }
}

/// Runs the handler for one request and writes the default response when
/// a two-way handler wrote nothing. Returns the writer watch if the
/// handler hijacked the connection.
async fn run_handler(
    ctx: &ConnContext,
    writer: &WriteHandle,
    req: Request,
    hijackable: bool,
) -> Option<WriterWatch> {
    let mut res = derive_response(&req);
    res.set_class(CLASS_RESPONSE.as_bytes());
    let fallback = (!req.is_oneway()).then(|| res.clone());

    let rw = ResponseWriter::new(res, writer.clone(), hijackable);
    let watch = rw.watch();

    {
        let _command = CommandGuard::begin(&ctx.metrics);
        ctx.handler.serve(rw, req).await;
    }

    if watch.is_hijacked() {
        return Some(watch);
    }
    if watch.is_written() {
        ctx.metrics.add_bytes_written(watch.bytes_written());
        return None;
    }
    if let Some(mut res) = fallback {
        let mut frame = BytesMut::with_capacity(res.size());
        match res.write(&mut frame) {
            Ok(()) => {
                let n = frame.len();
                match writer.write(frame.freeze()).await {
                    Ok(()) => ctx.metrics.add_bytes_written(n),
                    Err(e) => debug!("Default response not written: {}", e),
                }
            }
            Err(e) => warn!("Failed to encode default response: {}", e),
        }
    }
    None
}

async fn closing(rx: &mut watch::Receiver<CloseMode>) {
    let _ = rx.wait_for(|mode| *mode != CloseMode::Open).await;
}

async fn forced(rx: &mut watch::Receiver<CloseMode>) {
    let _ = rx.wait_for(|mode| *mode == CloseMode::Force).await;
}
