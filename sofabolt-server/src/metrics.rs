//! Prometheus metrics for the BOLT server.
//!
//! Every counter lives in a private [`Registry`]; [`ServerMetrics::encode`]
//! renders it in the Prometheus text format for whatever exporter the
//! embedding application runs.

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Server-wide counters.
#[derive(Clone)]
pub struct ServerMetrics {
    registry: Registry,
    bytes_read: IntCounter,
    bytes_written: IntCounter,
    commands: IntCounter,
    pending_commands: IntGauge,
    connections: IntCounter,
    pending_connections: IntGauge,
}

impl ServerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let bytes_read = IntCounter::with_opts(Opts::new(
            "sofabolt_server_bytes_read_total",
            "Bytes of request frames decoded",
        ))?;
        registry.register(Box::new(bytes_read.clone()))?;

        let bytes_written = IntCounter::with_opts(Opts::new(
            "sofabolt_server_bytes_written_total",
            "Bytes of response frames written",
        ))?;
        registry.register(Box::new(bytes_written.clone()))?;

        let commands = IntCounter::with_opts(Opts::new(
            "sofabolt_server_commands_total",
            "Requests handed to the handler",
        ))?;
        registry.register(Box::new(commands.clone()))?;

        let pending_commands = IntGauge::with_opts(Opts::new(
            "sofabolt_server_pending_commands",
            "Requests currently inside the handler",
        ))?;
        registry.register(Box::new(pending_commands.clone()))?;

        let connections = IntCounter::with_opts(Opts::new(
            "sofabolt_server_connections_total",
            "Connections served",
        ))?;
        registry.register(Box::new(connections.clone()))?;

        let pending_connections = IntGauge::with_opts(Opts::new(
            "sofabolt_server_pending_connections",
            "Connections currently open",
        ))?;
        registry.register(Box::new(pending_connections.clone()))?;

        Ok(Self {
            registry,
            bytes_read,
            bytes_written,
            commands,
            pending_commands,
            connections,
            pending_connections,
        })
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.get()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.get()
    }

    pub fn commands(&self) -> u64 {
        self.commands.get()
    }

    pub fn pending_commands(&self) -> i64 {
        self.pending_commands.get()
    }

    pub fn connections(&self) -> u64 {
        self.connections.get()
    }

    pub fn pending_connections(&self) -> i64 {
        self.pending_connections.get()
    }

    pub(crate) fn add_bytes_read(&self, n: usize) {
        self.bytes_read.inc_by(n as u64);
    }

    pub(crate) fn add_bytes_written(&self, n: usize) {
        self.bytes_written.inc_by(n as u64);
    }

    pub(crate) fn begin_command(&self) {
        self.commands.inc();
        self.pending_commands.inc();
    }

    pub(crate) fn end_command(&self) {
        self.pending_commands.dec();
    }

    pub(crate) fn open_connection(&self) {
        self.connections.inc();
        self.pending_connections.inc();
    }

    pub(crate) fn close_connection(&self) {
        self.pending_connections.dec();
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for ServerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerMetrics")
            .field("bytes_read", &self.bytes_read())
            .field("bytes_written", &self.bytes_written())
            .field("commands", &self.commands())
            .field("pending_commands", &self.pending_commands())
            .field("connections", &self.connections())
            .field("pending_connections", &self.pending_connections())
            .finish()
    }
}
