//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sofabolt_conn::writer::default_max_pending;
use sofabolt_conn::{Handler, WriterConfig};
use sofabolt_protocol::ConnectionCodec;

use crate::status::StatusListener;

/// Called after every heartbeat probe with whether it succeeded.
pub type HeartbeatListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Exponential redial backoff, without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedialBackoff {
    pub min: Duration,
    pub max: Duration,
    pub factor: u32,
}

impl Default for RedialBackoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_secs(5),
            factor: 2,
        }
    }
}

impl RedialBackoff {
    /// Delay before the `attempt`-th dial, counting from zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.min.is_zero() {
            return Duration::ZERO;
        }
        let factor = self.factor.max(1);
        if factor == 1 {
            return self.min.min(self.max);
        }
        let mut delay = self.min;
        for _ in 0..attempt {
            delay = delay.saturating_mul(factor);
            if delay >= self.max {
                return self.max;
            }
        }
        delay.min(self.max)
    }
}

#[derive(Clone, Default)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// Timeout of each probe.
    pub timeout: Duration,
    /// Consecutive failures tolerated before the listener hears of it. When
    /// non-zero, heartbeating stops at that point.
    pub probes: usize,
    pub listener: Option<HeartbeatListener>,
}

impl HeartbeatConfig {
    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }
}

impl fmt::Debug for HeartbeatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatConfig")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("probes", &self.probes)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// Client configuration. Zero durations disable the matching timeout.
#[derive(Clone)]
pub struct ClientConfig {
    /// Deadline for the rest of a partially received frame.
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Deadline while waiting between frames.
    pub idle_timeout: Duration,
    pub flush_interval: Duration,
    /// Writer queue depth and batch size.
    pub max_pending_commands: usize,
    pub auto_increment_request_id: bool,
    pub heartbeat: HeartbeatConfig,
    pub redial_backoff: RedialBackoff,
    /// Serves requests sent by the peer.
    pub handler: Option<Arc<dyn Handler>>,
    /// Peer requests run on their own task. When false they run on the
    /// read loop, one at a time.
    pub async_dispatch: bool,
    pub status_listener: Option<Arc<dyn StatusListener>>,
    pub connection_codec: Option<Arc<dyn ConnectionCodec>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            idle_timeout: Duration::ZERO,
            flush_interval: Duration::ZERO,
            max_pending_commands: default_max_pending(),
            auto_increment_request_id: true,
            heartbeat: HeartbeatConfig::default(),
            redial_backoff: RedialBackoff::default(),
            handler: None,
            async_dispatch: true,
            status_listener: None,
            connection_codec: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(
        mut self,
        read_timeout: Duration,
        write_timeout: Duration,
        idle_timeout: Duration,
        flush_interval: Duration,
    ) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self.idle_timeout = idle_timeout;
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_pending_commands(mut self, n: usize) -> Self {
        self.max_pending_commands = n.max(1);
        self
    }

    pub fn with_auto_increment_request_id(mut self, enabled: bool) -> Self {
        self.auto_increment_request_id = enabled;
        self
    }

    pub fn with_heartbeat(
        mut self,
        interval: Duration,
        timeout: Duration,
        probes: usize,
        listener: impl Fn(bool) + Send + Sync + 'static,
    ) -> Self {
        self.heartbeat = HeartbeatConfig {
            interval,
            timeout,
            probes,
            listener: Some(Arc::new(listener)),
        };
        self
    }

    pub fn with_redial_backoff(mut self, backoff: RedialBackoff) -> Self {
        self.redial_backoff = backoff;
        self
    }

    pub fn with_handler(mut self, handler: impl Handler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_async_dispatch(mut self, enabled: bool) -> Self {
        self.async_dispatch = enabled;
        self
    }

    pub fn with_status_listener(mut self, listener: impl StatusListener) -> Self {
        self.status_listener = Some(Arc::new(listener));
        self
    }

    pub fn with_connection_codec(mut self, codec: Arc<dyn ConnectionCodec>) -> Self {
        self.connection_codec = Some(codec);
        self
    }

    pub(crate) fn writer_config(&self) -> WriterConfig {
        WriterConfig::default()
            .with_flush_interval(self.flush_interval)
            .with_write_timeout(self.write_timeout)
            .with_batch(self.max_pending_commands)
            .with_max_pending(self.max_pending_commands)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("flush_interval", &self.flush_interval)
            .field("max_pending_commands", &self.max_pending_commands)
            .field("auto_increment_request_id", &self.auto_increment_request_id)
            .field("heartbeat", &self.heartbeat)
            .field("redial_backoff", &self.redial_backoff)
            .field("handler", &self.handler.is_some())
            .field("async_dispatch", &self.async_dispatch)
            .finish_non_exhaustive()
    }
}
