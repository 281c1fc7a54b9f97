//! Connection status machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a client connection.
///
/// ```text
/// Idle -> Connecting -> Active <-> ReadTimeout
///                         |
///                         v
///                  TransientFailure -> Connecting -> Active
///                         |
///                         v
///                      Shutdown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnStatus {
    Idle = 0,
    Connecting = 1,
    Active = 2,
    ReadTimeout = 3,
    TransientFailure = 4,
    Shutdown = 5,
}

impl ConnStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnStatus::Idle,
            1 => ConnStatus::Connecting,
            2 => ConnStatus::Active,
            3 => ConnStatus::ReadTimeout,
            4 => ConnStatus::TransientFailure,
            _ => ConnStatus::Shutdown,
        }
    }
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnStatus::Idle => "idle",
            ConnStatus::Connecting => "connecting",
            ConnStatus::Active => "active",
            ConnStatus::ReadTimeout => "read_timeout",
            ConnStatus::TransientFailure => "transient_failure",
            ConnStatus::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Observes status transitions. Runs on the read loop; must not block.
pub trait StatusListener: Send + Sync + 'static {
    fn on_status_change(&self, from: ConnStatus, to: ConnStatus);
}

impl<F> StatusListener for F
where
    F: Fn(ConnStatus, ConnStatus) + Send + Sync + 'static,
{
    fn on_status_change(&self, from: ConnStatus, to: ConnStatus) {
        self(from, to)
    }
}

pub(crate) struct StatusCell {
    status: AtomicU8,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self {
            status: AtomicU8::new(ConnStatus::Idle as u8),
        }
    }

    pub(crate) fn get(&self) -> ConnStatus {
        ConnStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Stores `to`, returning the previous status when it changed.
    pub(crate) fn transition(&self, to: ConnStatus) -> Option<ConnStatus> {
        let from = ConnStatus::from_u8(self.status.swap(to as u8, Ordering::AcqRel));
        (from != to).then_some(from)
    }
}
