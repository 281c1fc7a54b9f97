//! # sofabolt-conn
//!
//! Connection plumbing shared by the BOLT client and server:
//! - [`AsyncWriter`]: a task owning the write half of a transport, batching
//!   and flushing queued frames
//! - [`MeteredStream`]: byte accounting around any transport
//! - [`read_with_deadline`]: bounded reads for connection read loops
//! - [`StateCell`]: connection lifecycle state with its last change time
//! - [`Handler`] and [`ResponseWriter`]: the request handling contract

pub mod error;
pub mod handler;
pub mod metered;
pub mod read;
pub mod state;
pub mod writer;

pub use error::ConnError;
pub use handler::{derive_response, Handler, HandlerFuture, Hijacked, ResponseWriter, WriterWatch};
pub use metered::{ByteCounters, MeteredStream};
pub use read::{read_with_deadline, READ_CHUNK};
pub use state::{ConnState, StateCell};
pub use writer::{AsyncWriter, WriteHandle, WriterConfig, WriterMetrics};

use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional byte stream usable as a BOLT transport.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased transport.
pub type BoxStream = Box<dyn AsyncStream>;
