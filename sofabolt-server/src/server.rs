//! TCP server implementation.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use sofabolt_conn::{writer::default_max_pending, AsyncStream, Handler, WriterConfig};
use sofabolt_protocol::{ConnectionCodec, DEFAULT_PORT};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::connection::{self, CloseMode, ConnContext, ConnOutcome, Connection};
use crate::error::ServerError;
use crate::event::{EventContext, EventListener, ServerEvent, SharedListener};
use crate::metrics::ServerMetrics;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address used by [`Server::run`].
    pub bind_addr: SocketAddr,
    /// Connections accepted beyond this are dropped.
    pub max_connections: usize,
    /// Deadline for the first two requests and for completing a partial
    /// frame. Zero disables it.
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Deadline between frames once two requests have been read.
    pub idle_timeout: Duration,
    pub flush_interval: Duration,
    /// Concurrent async handlers per connection, and writer queue depth.
    pub max_pending_commands: usize,
    /// Run each handler in its own task.
    pub async_dispatch: bool,
    pub shutdown_poll_interval: Duration,
    /// How long a connection that never sent a request counts as busy
    /// during shutdown.
    pub shutdown_idle_threshold: Duration,
    /// TBRemoting connection blob codec attached to decoded requests.
    pub connection_codec: Option<Arc<dyn ConnectionCodec>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("flush_interval", &self.flush_interval)
            .field("max_pending_commands", &self.max_pending_commands)
            .field("async_dispatch", &self.async_dispatch)
            .field("shutdown_poll_interval", &self.shutdown_poll_interval)
            .field("shutdown_idle_threshold", &self.shutdown_idle_threshold)
            .field("connection_codec", &self.connection_codec.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            max_connections: 10240,
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            idle_timeout: Duration::ZERO,
            flush_interval: Duration::ZERO,
            max_pending_commands: default_max_pending(),
            async_dispatch: false,
            shutdown_poll_interval: Duration::from_millis(500),
            shutdown_idle_threshold: Duration::from_secs(5),
            connection_codec: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_pending_commands(mut self, max: usize) -> Self {
        self.max_pending_commands = max.max(1);
        self
    }

    pub fn with_async_dispatch(mut self, enabled: bool) -> Self {
        self.async_dispatch = enabled;
        self
    }

    /// Sets the shutdown poll interval and idle threshold.
    pub fn with_shutdown(mut self, poll_interval: Duration, idle_threshold: Duration) -> Self {
        self.shutdown_poll_interval = poll_interval;
        self.shutdown_idle_threshold = idle_threshold;
        self
    }

    pub fn with_connection_codec(mut self, codec: Arc<dyn ConnectionCodec>) -> Self {
        self.connection_codec = Some(codec);
        self
    }

    pub(crate) fn writer_config(&self) -> WriterConfig {
        WriterConfig::default()
            .with_flush_interval(self.flush_interval)
            .with_write_timeout(self.write_timeout)
            .with_max_pending(self.max_pending_commands)
            .with_batch(self.max_pending_commands)
    }
}

struct ServerInner {
    ctx: Arc<ConnContext>,
    connections: DashMap<Uuid, Arc<Connection>>,
    listener: RwLock<Option<SharedListener>>,
    shutdown: watch::Sender<bool>,
}

/// BOLT server. Cheap to clone; clones share connections and shutdown.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Creates a server with its own metrics registry.
    pub fn new(config: ServerConfig, handler: impl Handler) -> Result<Self, ServerError> {
        Ok(Self::with_metrics(config, handler, ServerMetrics::new()?))
    }

    pub fn with_metrics(
        config: ServerConfig,
        handler: impl Handler,
        metrics: ServerMetrics,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServerInner {
                ctx: Arc::new(ConnContext {
                    config,
                    handler: Arc::new(handler),
                    metrics,
                }),
                connections: DashMap::new(),
                listener: RwLock::new(None),
                shutdown,
            }),
        }
    }

    pub fn set_event_listener(&self, listener: impl EventListener) {
        *self.inner.listener.write() = Some(Arc::new(listener));
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.ctx.config
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.inner.ctx.metrics
    }

    /// Number of open connections.
    pub fn connections(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Binds `config.bind_addr` and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.bind_and_serve(self.inner.ctx.config.bind_addr).await
    }

    pub async fn bind_and_serve(&self, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accepts connections until [`Server::shutdown`] is called or accept
    /// fails with a non-temporary error.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Server listening on {}", addr);
        }
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let mut backoff = Duration::ZERO;

        loop {
            let accepted = tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => {
                    tracing::info!("Server stopped accepting connections");
                    return Ok(());
                }
                r = listener.accept() => r,
            };

            match accepted {
                Ok((stream, peer)) => {
                    backoff = Duration::ZERO;
                    self.accept(stream, peer);
                }
                Err(e) if is_temporary(&e) => {
                    backoff = if backoff.is_zero() {
                        ACCEPT_BACKOFF_MIN
                    } else {
                        (backoff * 2).min(ACCEPT_BACKOFF_MAX)
                    };
                    tracing::warn!("Accept error: {}; retrying in {:?}", e, backoff);
                    self.emit(
                        &EventContext::new(ServerEvent::TemporaryAccept),
                        Some(&ServerError::Io(e)),
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        if self.inner.connections.len() >= self.inner.ctx.config.max_connections {
            tracing::warn!("Connection limit reached, rejecting {}", peer);
            self.emit(
                &EventContext::new(ServerEvent::WorkerPoolOverflow).with_peer(Some(peer)),
                None,
            );
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("[{}] set_nodelay failed: {}", peer, e);
        }
        let conn = self.register(Some(peer));
        let server = self.clone();
        tokio::spawn(async move {
            let _ = server.run_conn(Box::new(stream), conn).await;
        });
    }

    /// Serves one already-established transport on the calling task.
    pub async fn serve_conn(
        &self,
        stream: impl AsyncStream,
        peer: Option<SocketAddr>,
    ) -> Result<ConnOutcome, ServerError> {
        if self.is_shutting_down() {
            return Err(ServerError::ShuttingDown);
        }
        let conn = self.register(peer);
        self.run_conn(Box::new(stream), conn).await
    }

    fn register(&self, peer: Option<SocketAddr>) -> Arc<Connection> {
        let conn = Connection::new(peer);
        self.inner.connections.insert(conn.id(), conn.clone());
        self.inner.ctx.metrics.open_connection();
        conn
    }

    async fn run_conn(
        &self,
        stream: sofabolt_conn::BoxStream,
        conn: Arc<Connection>,
    ) -> Result<ConnOutcome, ServerError> {
        let label = conn
            .peer()
            .map(|p| p.to_string())
            .unwrap_or_else(|| conn.id().to_string());
        tracing::debug!("[{}] New connection", label);

        let result = connection::serve(stream, conn.clone(), self.inner.ctx.clone()).await;

        self.inner.connections.remove(&conn.id());
        self.inner.ctx.metrics.close_connection();

        let event = EventContext::new(ServerEvent::ConnError).with_conn(conn.id(), conn.peer());
        match &result {
            Ok(ConnOutcome::Closed) => tracing::debug!("[{}] Connection closed", label),
            Ok(ConnOutcome::Hijacked) => {
                tracing::debug!("[{}] Connection hijacked", label);
                self.emit(
                    &EventContext {
                        event: ServerEvent::ConnHijacked,
                        ..event
                    },
                    None,
                );
            }
            Err(e) if e.is_eof() => tracing::debug!("[{}] Connection closed: {}", label, e),
            Err(e) => {
                tracing::warn!("[{}] Connection error: {}", label, e);
                self.emit(&event, Some(e));
            }
        }
        result
    }

    /// Stops accepting, then closes connections as they go quiet. Once
    /// `deadline` passes the remaining connections are closed forcibly and
    /// [`ServerError::ShutdownTimeout`] reports how many there were.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        self.inner.shutdown.send_replace(true);
        let config = &self.inner.ctx.config;
        let poll = if config.shutdown_poll_interval.is_zero() {
            Duration::from_millis(10)
        } else {
            config.shutdown_poll_interval
        };
        let expires = Instant::now() + deadline;
        tracing::info!(
            "Shutting down with {} open connections",
            self.inner.connections.len()
        );

        loop {
            for entry in self.inner.connections.iter() {
                if entry.is_quiescent(config.shutdown_idle_threshold) {
                    entry.close(CloseMode::Graceful);
                }
            }
            if self.inner.connections.is_empty() {
                tracing::info!("Shutdown complete");
                return Ok(());
            }

            let now = Instant::now();
            if now >= expires {
                let open = self.inner.connections.len();
                for entry in self.inner.connections.iter() {
                    tracing::debug!("[{}] Forcing close while {}", entry.id(), entry.state());
                    entry.close(CloseMode::Force);
                }
                tracing::warn!("Shutdown deadline passed, forced {} connections closed", open);
                return Err(ServerError::ShutdownTimeout(open));
            }
            tokio::time::sleep(poll.min(expires - now)).await;
        }
    }

    fn emit(&self, ctx: &EventContext, err: Option<&ServerError>) {
        let listener = self.inner.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_event(ctx, err);
        }
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

fn is_temporary(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionRefused | ConnectionAborted | ConnectionReset | Interrupted | WouldBlock | TimedOut
    ) || matches!(e.raw_os_error(), Some(23) | Some(24))
}
