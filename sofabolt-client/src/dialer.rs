//! Transport dialers.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use sofabolt_conn::BoxStream;
use tokio::net::TcpStream;

pub type DialFuture = Pin<Box<dyn Future<Output = io::Result<BoxStream>> + Send>>;

/// Produces a fresh transport for the initial connect and every redial.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self) -> DialFuture;
}

impl<F, Fut> Dialer for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<BoxStream>> + Send + 'static,
{
    fn dial(&self) -> DialFuture {
        Box::pin(self())
    }
}

/// Dials a TCP address.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    pub nodelay: bool,
}

impl TcpDialer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            nodelay: true,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Dialer for TcpDialer {
    fn dial(&self) -> DialFuture {
        let this = self.clone();
        Box::pin(async move {
            tracing::debug!("Dialing {}...", this.addr);
            let stream = tokio::time::timeout(this.connect_timeout, TcpStream::connect(this.addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??;
            if this.nodelay {
                stream.set_nodelay(true).ok();
            }
            Ok(Box::new(stream) as BoxStream)
        })
    }
}
