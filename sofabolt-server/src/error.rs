//! Server error types.

use sofabolt_conn::ConnError;
use sofabolt_protocol::ProtocolError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection error: {0}")]
    Conn(#[from] ConnError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("sofabolt: server received a response")]
    NotARequest,

    #[error("read timeout")]
    ReadTimeout,

    #[error("server shutting down")]
    ShuttingDown,

    #[error("shutdown deadline passed with {0} connections open")]
    ShutdownTimeout(usize),
}

impl ServerError {
    /// Returns whether the peer simply went away.
    pub fn is_eof(&self) -> bool {
        match self {
            ServerError::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            ServerError::Conn(e) => e.is_eof(),
            _ => false,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServerError::Io(_) | ServerError::Conn(_) | ServerError::ReadTimeout
        )
    }
}
