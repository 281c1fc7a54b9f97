//! # sofabolt-client
//!
//! Client library for the BOLT RPC protocol.
//!
//! Many concurrent calls share one persistent connection; responses are
//! correlated back to their callers by request id, in any order.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sofabolt_client::{Client, ClientConfig, TcpDialer};
//! use sofabolt_protocol::Request;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dialer = TcpDialer::new("127.0.0.1:12200".parse()?);
//!     let client = Client::connect(dialer, ClientConfig::default()).await;
//!
//!     let mut req = Request::new();
//!     req.set_content(b"hello world");
//!     let res = client.invoke_timeout(&mut req, Duration::from_secs(1)).await?;
//!     println!("{}", String::from_utf8_lossy(res.content()));
//!
//!     client.close()?;
//!     Ok(())
//! }
//! ```

pub mod bolt;
pub mod client;
pub mod config;
pub mod conn;
pub mod dialer;
pub mod error;
pub mod invoke;
pub mod metrics;
pub mod status;

pub use bolt::{BoltCodec, BoltDispatcher, BoltFrame, PendingTable};
pub use client::Client;
pub use config::{ClientConfig, HeartbeatConfig, HeartbeatListener, RedialBackoff};
pub use conn::{ClientConn, Dispatcher, FrameCodec};
pub use dialer::{Dialer, DialFuture, TcpDialer};
pub use error::ClientError;
pub use invoke::{Completion, InvokeContext};
pub use metrics::ClientMetrics;
pub use status::{ConnStatus, StatusListener};
