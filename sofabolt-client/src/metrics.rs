//! Client metrics.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sofabolt_conn::{ByteCounters, WriterMetrics};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Counters shared by every connection a client goes through.
#[derive(Debug)]
pub struct ClientMetrics {
    bytes: Arc<ByteCounters>,
    writer: Arc<WriterMetrics>,
    references: AtomicI64,
    used: AtomicU64,
    created: u64,
    lasted: AtomicU64,
}

impl ClientMetrics {
    pub fn new() -> Self {
        let now = unix_now();
        Self {
            bytes: Arc::new(ByteCounters::new()),
            writer: Arc::new(WriterMetrics::new()),
            references: AtomicI64::new(0),
            used: AtomicU64::new(0),
            created: now,
            lasted: AtomicU64::new(now),
        }
    }

    pub(crate) fn byte_counters(&self) -> &Arc<ByteCounters> {
        &self.bytes
    }

    pub(crate) fn writer_metrics(&self) -> &Arc<WriterMetrics> {
        &self.writer
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes.bytes_read()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes.bytes_written()
    }

    /// Frames written to the transport.
    pub fn commands(&self) -> u64 {
        self.writer.commands()
    }

    /// Frames queued for writing but not yet flushed.
    pub fn pending_commands(&self) -> i64 {
        self.writer.pending_commands()
    }

    /// Calls currently in progress.
    pub fn references(&self) -> i64 {
        self.references.load(Ordering::Relaxed)
    }

    /// Calls issued so far.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Unix time the metrics were created.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Unix time of the last completed call.
    pub fn lasted(&self) -> u64 {
        self.lasted.load(Ordering::Relaxed)
    }

    pub(crate) fn begin_call(&self) {
        self.references.fetch_add(1, Ordering::Relaxed);
        self.used.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn end_call(&self) {
        self.lasted.store(unix_now(), Ordering::Relaxed);
        self.references.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_accounting() {
        let metrics = ClientMetrics::new();
        metrics.begin_call();
        metrics.begin_call();
        assert_eq!(metrics.references(), 2);
        metrics.end_call();
        metrics.end_call();
        assert_eq!(metrics.references(), 0);
        assert_eq!(metrics.used(), 2);
        assert!(metrics.lasted() >= metrics.created());
    }
}
