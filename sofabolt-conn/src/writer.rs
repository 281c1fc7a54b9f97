//! Asynchronous batching writer.
//!
//! A dedicated task owns the write half of a transport. Producers hand it
//! encoded frames through a bounded queue; the task coalesces whatever is
//! queued and flushes according to [`WriterConfig`]:
//!
//! - `flush_interval == 0`: write and flush as soon as the queue is drained
//! - otherwise: flush once `flush_interval` has elapsed since the last flush
//!   or `batch` frames are buffered, whichever comes first
//!
//! A full queue makes [`WriteHandle::write`] wait; it only fails once the
//! task has terminated, with the reason it terminated.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ConnError;

/// Default queue depth and batch size.
pub fn default_max_pending() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 16
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Zero flushes after every drained queue.
    pub flush_interval: Duration,
    /// Frames buffered before a flush is forced.
    pub batch: usize,
    /// Bound on each write+flush; zero disables it.
    pub write_timeout: Duration,
    /// Queue capacity.
    pub max_pending: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        let max_pending = default_max_pending();
        Self {
            flush_interval: Duration::ZERO,
            batch: max_pending,
            write_timeout: Duration::ZERO,
            max_pending,
        }
    }
}

impl WriterConfig {
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }
}

#[derive(Debug, Default)]
pub struct WriterMetrics {
    commands: AtomicU64,
    pending: AtomicI64,
    bytes: AtomicU64,
}

impl WriterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames handed to the transport.
    pub fn commands(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Frames queued or buffered but not yet flushed.
    pub fn pending_commands(&self) -> i64 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

struct Shared {
    terminal: Mutex<Option<ConnError>>,
    shutdown: Notify,
    metrics: Arc<WriterMetrics>,
}

impl Shared {
    fn terminal_error(&self) -> ConnError {
        self.terminal
            .lock()
            .clone()
            .unwrap_or(ConnError::WriterClosed)
    }
}

/// Cloneable producer side of an [`AsyncWriter`].
#[derive(Clone)]
pub struct WriteHandle {
    tx: Option<mpsc::Sender<Bytes>>,
    shared: Arc<Shared>,
}

impl WriteHandle {
    /// A handle whose writes always fail with `reason`.
    pub fn closed(reason: ConnError) -> Self {
        Self {
            tx: None,
            shared: Arc::new(Shared {
                terminal: Mutex::new(Some(reason)),
                shutdown: Notify::new(),
                metrics: Arc::new(WriterMetrics::new()),
            }),
        }
    }

    /// Queues one encoded frame, waiting while the queue is full.
    pub async fn write(&self, frame: Bytes) -> Result<(), ConnError> {
        let tx = match &self.tx {
            Some(tx) => tx,
            None => return Err(self.shared.terminal_error()),
        };
        self.shared.metrics.pending.fetch_add(1, Ordering::Relaxed);
        if tx.send(frame).await.is_err() {
            self.shared.metrics.pending.fetch_sub(1, Ordering::Relaxed);
            return Err(self.shared.terminal_error());
        }
        Ok(())
    }

    /// Asks the writer task to flush everything queued and stop.
    pub fn shutdown(&self) {
        self.shared.shutdown.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }

    /// Reason the writer terminated, if it has.
    pub fn terminal_error(&self) -> Option<ConnError> {
        self.shared.terminal.lock().clone()
    }

    pub fn metrics(&self) -> &Arc<WriterMetrics> {
        &self.shared.metrics
    }
}

/// Spawns writer tasks.
pub struct AsyncWriter;

impl AsyncWriter {
    /// Moves `writer` into a new task. The join handle yields it back once
    /// the task stops.
    pub fn spawn<W>(
        writer: W,
        config: WriterConfig,
        metrics: Arc<WriterMetrics>,
    ) -> (WriteHandle, JoinHandle<W>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.max_pending.max(1));
        let shared = Arc::new(Shared {
            terminal: Mutex::new(None),
            shutdown: Notify::new(),
            metrics,
        });
        let task = WriterTask {
            writer,
            rx,
            config,
            shared: shared.clone(),
            buf: BytesMut::new(),
            buffered: 0,
            last_flush: Instant::now(),
        };
        let join = tokio::spawn(task.run());
        (
            WriteHandle {
                tx: Some(tx),
                shared,
            },
            join,
        )
    }
}

struct WriterTask<W> {
    writer: W,
    rx: mpsc::Receiver<Bytes>,
    config: WriterConfig,
    shared: Arc<Shared>,
    buf: BytesMut,
    buffered: usize,
    last_flush: Instant,
}

impl<W: AsyncWrite + Unpin> WriterTask<W> {
    async fn run(mut self) -> W {
        if let Err(e) = self.drive().await {
            debug!("async writer stopped: {}", e);
            *self.shared.terminal.lock() = Some(e);
        }
        self.rx.close();
        let dropped = self.buffered as i64;
        if dropped > 0 {
            self.shared.metrics.pending.fetch_sub(dropped, Ordering::Relaxed);
        }
        self.writer
    }

    async fn drive(&mut self) -> Result<(), ConnError> {
        let batch = self.config.batch.max(1);
        let interval = self.config.flush_interval;
        loop {
            let deadline = (self.buffered > 0 && !interval.is_zero())
                .then(|| self.last_flush + interval);
            tokio::select! {
                biased;
                _ = self.shared.shutdown.notified() => {
                    self.rx.close();
                    while let Ok(frame) = self.rx.try_recv() {
                        self.push(frame);
                    }
                    self.flush().await?;
                    *self.shared.terminal.lock() = Some(ConnError::WriterClosed);
                    return Ok(());
                }
                msg = self.rx.recv() => match msg {
                    Some(frame) => {
                        self.push(frame);
                        while self.buffered < batch {
                            match self.rx.try_recv() {
                                Ok(frame) => self.push(frame),
                                Err(_) => break,
                            }
                        }
                        if interval.is_zero()
                            || self.buffered >= batch
                            || self.last_flush.elapsed() >= interval
                        {
                            self.flush().await?;
                        }
                    }
                    None => {
                        self.flush().await?;
                        return Ok(());
                    }
                },
                _ = sleep_until(deadline) => {
                    self.flush().await?;
                }
            }
        }
    }

    fn push(&mut self, frame: Bytes) {
        self.buf.extend_from_slice(&frame);
        self.buffered += 1;
    }

    async fn flush(&mut self) -> Result<(), ConnError> {
        self.last_flush = Instant::now();
        if self.buffered == 0 {
            return Ok(());
        }
        let timeout = self.config.write_timeout;
        let writer = &mut self.writer;
        let data = &self.buf[..];
        let io = async {
            writer.write_all(data).await?;
            writer.flush().await
        };
        if timeout.is_zero() {
            io.await?;
        } else {
            tokio::time::timeout(timeout, io)
                .await
                .map_err(|_| ConnError::WriteTimeout)??;
        }

        let metrics = &self.shared.metrics;
        metrics.commands.fetch_add(self.buffered as u64, Ordering::Relaxed);
        metrics.pending.fetch_sub(self.buffered as i64, Ordering::Relaxed);
        metrics.bytes.fetch_add(self.buf.len() as u64, Ordering::Relaxed);
        self.buf.clear();
        self.buffered = 0;
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
