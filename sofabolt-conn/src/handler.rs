//! Request handling contract.
//!
//! A [`Handler`] receives each inbound request together with a
//! [`ResponseWriter`] holding the derived response. The handler fills the
//! response and calls [`ResponseWriter::write`] once, or takes over the raw
//! transport with [`ResponseWriter::hijack`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use sofabolt_protocol::{CmdCode, Request, Response};
use tokio::sync::oneshot;

use crate::error::ConnError;
use crate::writer::WriteHandle;
use crate::BoxStream;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Serves inbound requests.
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, rw: ResponseWriter, req: Request) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(ResponseWriter, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn serve(&self, rw: ResponseWriter, req: Request) -> HandlerFuture {
        Box::pin(self(rw, req))
    }
}

/// Raw transport released by a hijacked connection.
pub struct Hijacked {
    pub stream: BoxStream,
    /// Bytes read from the transport but not yet decoded.
    pub buffered: BytesMut,
}

impl fmt::Debug for Hijacked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hijacked")
            .field("buffered", &self.buffered.len())
            .finish_non_exhaustive()
    }
}

static NEXT_WRITER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct WriterShared {
    written: AtomicBool,
    bytes: AtomicUsize,
    hijacked: AtomicBool,
    hijack_tx: Mutex<Option<oneshot::Sender<Hijacked>>>,
}

/// Connection-side view of a [`ResponseWriter`] handed to a handler.
#[derive(Clone)]
pub struct WriterWatch {
    shared: Arc<WriterShared>,
}

impl WriterWatch {
    pub fn is_written(&self) -> bool {
        self.shared.written.load(Ordering::Acquire)
    }

    /// Bytes of the response written through the writer.
    pub fn bytes_written(&self) -> usize {
        self.shared.bytes.load(Ordering::Acquire)
    }

    pub fn is_hijacked(&self) -> bool {
        self.shared.hijacked.load(Ordering::Acquire)
    }

    /// Hands the transport to the hijacker. Gives it back when the
    /// receiving side is gone.
    pub fn complete_hijack(&self, hijacked: Hijacked) -> Result<(), Hijacked> {
        match self.shared.hijack_tx.lock().take() {
            Some(tx) => tx.send(hijacked),
            None => Err(hijacked),
        }
    }
}

/// Writes the response to one request.
pub struct ResponseWriter {
    id: u64,
    response: Response,
    writer: WriteHandle,
    hijackable: bool,
    shared: Arc<WriterShared>,
    write_error: Option<ConnError>,
}

impl ResponseWriter {
    /// `hijackable` is false on client-side writers.
    pub fn new(response: Response, writer: WriteHandle, hijackable: bool) -> Self {
        Self {
            id: NEXT_WRITER_ID.fetch_add(1, Ordering::Relaxed),
            response,
            writer,
            hijackable,
            shared: Arc::new(WriterShared::default()),
            write_error: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn watch(&self) -> WriterWatch {
        WriterWatch {
            shared: self.shared.clone(),
        }
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn write_handle(&self) -> &WriteHandle {
        &self.writer
    }

    pub fn is_written(&self) -> bool {
        self.shared.written.load(Ordering::Acquire)
    }

    /// Encodes and queues the response. Only the first call writes.
    pub async fn write(&mut self) -> Result<usize, ConnError> {
        if self.shared.written.swap(true, Ordering::AcqRel) {
            return Err(ConnError::DuplicatedWrite);
        }
        let mut buf = BytesMut::with_capacity(self.response.size());
        if let Err(e) = self.response.write(&mut buf) {
            let e = ConnError::from(e);
            self.write_error = Some(e.clone());
            return Err(e);
        }
        let n = buf.len();
        match self.writer.write(buf.freeze()).await {
            Ok(()) => {
                self.shared.bytes.store(n, Ordering::Release);
                Ok(n)
            }
            Err(e) => {
                self.write_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Error of the last write, if it failed.
    pub fn write_error(&self) -> Option<&ConnError> {
        self.write_error.as_ref()
    }

    /// Takes over the transport. Later writes fail.
    ///
    /// The receiver yields the transport only after the handler has
    /// returned and the connection loop has stopped driving it, so awaiting
    /// it inside the handler never completes. Hand it to a spawned task:
    ///
    /// ```ignore
    /// let released = rw.hijack()?;
    /// tokio::spawn(async move {
    ///     if let Ok(hijacked) = released.await {
    ///         // raw I/O on hijacked.stream
    ///     }
    /// });
    /// ```
    pub fn hijack(&self) -> Result<oneshot::Receiver<Hijacked>, ConnError> {
        if !self.hijackable {
            return Err(ConnError::HijackUnsupported);
        }
        if self
            .shared
            .hijacked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConnError::AlreadyHijacked);
        }
        self.shared.written.store(true, Ordering::Release);
        let (tx, rx) = oneshot::channel();
        *self.shared.hijack_tx.lock() = Some(tx);
        Ok(rx)
    }
}

impl fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("id", &self.id)
            .field("response", &self.response)
            .field("written", &self.is_written())
            .finish()
    }
}

/// Builds the default response to `req`.
///
/// Heartbeats are answered with a heartbeat and TBRemoting requests with a
/// TBRemoting response.
pub fn derive_response(req: &Request) -> Response {
    let mut res = Response::new();
    res.derive(req);
    match req.cmdcode() {
        CmdCode::HEARTBEAT => {
            res.set_cmdcode(CmdCode::HEARTBEAT);
        }
        CmdCode::TR_REQUEST => {
            res.set_cmdcode(CmdCode::TR_RESPONSE);
        }
        _ => {}
    }
    res
}
