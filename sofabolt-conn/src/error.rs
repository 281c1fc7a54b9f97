//! Connection error types.

use std::io;
use std::sync::Arc;

use sofabolt_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by connection plumbing.
///
/// Cloneable so a single terminal error can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum ConnError {
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("sofabolt: duplicated write")]
    DuplicatedWrite,

    #[error("sofabolt: connection already hijacked")]
    AlreadyHijacked,

    #[error("sofabolt: hijack not supported")]
    HijackUnsupported,

    #[error("sofabolt: writer closed")]
    WriterClosed,

    #[error("sofabolt: write timeout")]
    WriteTimeout,

    #[error("{0}")]
    Closed(String),
}

impl From<io::Error> for ConnError {
    fn from(e: io::Error) -> Self {
        ConnError::Io(Arc::new(e))
    }
}

impl ConnError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ConnError::WriteTimeout => true,
            ConnError::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Returns whether the peer went away cleanly.
    pub fn is_eof(&self) -> bool {
        matches!(self, ConnError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}
