//! In-flight call bookkeeping.

use std::fmt;
use std::time::{Duration, Instant};

use sofabolt_protocol::{CmdCode, Response};
use tokio::sync::oneshot;

use crate::error::ClientError;

pub type CallResult = Result<Response, ClientError>;

/// How a call learns its outcome.
pub enum Completion {
    Channel(oneshot::Sender<CallResult>),
    Callback(Box<dyn FnOnce(CallResult) + Send>),
}

/// A call waiting for its response.
///
/// Consumed by [`InvokeContext::complete`], so each call completes once.
pub struct InvokeContext {
    created: Instant,
    timeout: Duration,
    request_id: u32,
    cmdcode: CmdCode,
    completion: Completion,
}

impl InvokeContext {
    pub fn new(request_id: u32, cmdcode: CmdCode, timeout: Duration, completion: Completion) -> Self {
        Self {
            created: Instant::now(),
            timeout,
            request_id,
            cmdcode,
            completion,
        }
    }

    /// A channel-completed context and the receiving end.
    pub fn channel(
        request_id: u32,
        cmdcode: CmdCode,
        timeout: Duration,
    ) -> (Self, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::new(request_id, cmdcode, timeout, Completion::Channel(tx)),
            rx,
        )
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Zero timeout means no deadline.
    pub fn deadline(&self) -> Option<Instant> {
        (!self.timeout.is_zero()).then(|| self.created + self.timeout)
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn cmdcode(&self) -> CmdCode {
        self.cmdcode
    }

    pub fn is_callback(&self) -> bool {
        matches!(self.completion, Completion::Callback(_))
    }

    /// Delivers the outcome. A caller that stopped waiting is ignored.
    pub fn complete(self, result: CallResult) {
        match self.completion {
            Completion::Channel(tx) => {
                let _ = tx.send(result);
            }
            Completion::Callback(cb) => cb(result),
        }
    }
}

impl fmt::Debug for InvokeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeContext")
            .field("request_id", &self.request_id)
            .field("cmdcode", &self.cmdcode)
            .field("timeout", &self.timeout)
            .field("callback", &self.is_callback())
            .finish()
    }
}
