//! # sofabolt-server
//!
//! TCP server for the BOLT RPC protocol.
//!
//! This crate provides:
//! - An accept loop with temporary-error backoff and a connection limit
//! - Per-connection request decoding with sync or async handler dispatch
//! - Batched response writing and connection hijacking
//! - Graceful shutdown that waits for idle connections
//! - Server events and Prometheus metrics
//! - YAML and environment configuration

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod metrics;
pub mod server;

pub use config::{Config, ConfigError};
pub use connection::ConnOutcome;
pub use error::ServerError;
pub use event::{EventContext, EventListener, ServerEvent};
pub use metrics::ServerMetrics;
pub use server::{Server, ServerConfig};
