//! Client error types.

use std::io;
use std::sync::Arc;

use sofabolt_conn::ConnError;
use sofabolt_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
///
/// Cloneable: the error that ends a connection is handed to every call
/// still waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("sofabolt: client do timeout")]
    Timeout,

    #[error("sofabolt: client was closed")]
    Closed,

    #[error("sofabolt: client send a response")]
    NotARequest,

    #[error("sofabolt: request id {0} is already pending")]
    DuplicateRequestId(u32),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection error: {0}")]
    Conn(#[from] ConnError),

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(Arc::new(e))
    }
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::Timeout => true,
            ClientError::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            ClientError::Conn(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Returns whether the call may succeed if issued again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout | ClientError::Io(_) | ClientError::Conn(_) => true,
            ClientError::Closed
            | ClientError::NotARequest
            | ClientError::DuplicateRequestId(_)
            | ClientError::Protocol(_) => false,
        }
    }
}
