//! Server events.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::ServerError;

/// Noteworthy things that happen outside of any handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    /// Accept failed with a temporary error; the loop backs off and retries.
    TemporaryAccept,
    /// A connection was refused because `max_connections` are open.
    WorkerPoolOverflow,
    /// A connection ended with an error other than EOF.
    ConnError,
    /// A handler took over a connection.
    ConnHijacked,
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerEvent::TemporaryAccept => "temporary_accept",
            ServerEvent::WorkerPoolOverflow => "worker_pool_overflow",
            ServerEvent::ConnError => "conn_error",
            ServerEvent::ConnHijacked => "conn_hijacked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct EventContext {
    pub event: ServerEvent,
    pub conn_id: Option<Uuid>,
    pub peer: Option<SocketAddr>,
}

impl EventContext {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            event,
            conn_id: None,
            peer: None,
        }
    }

    pub fn with_conn(mut self, conn_id: Uuid, peer: Option<SocketAddr>) -> Self {
        self.conn_id = Some(conn_id);
        self.peer = peer;
        self
    }

    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }
}

/// Receives server events. Called inline from the accept and connection
/// loops; must not block.
pub trait EventListener: Send + Sync + 'static {
    fn on_event(&self, ctx: &EventContext, err: Option<&ServerError>);
}

impl<F> EventListener for F
where
    F: Fn(&EventContext, Option<&ServerError>) + Send + Sync + 'static,
{
    fn on_event(&self, ctx: &EventContext, err: Option<&ServerError>) {
        self(ctx, err)
    }
}

pub(crate) type SharedListener = Arc<dyn EventListener>;
