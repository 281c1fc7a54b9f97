//! sofabolt - BOLT echo server
//!
//! Answers every request with its own content, optionally after a delay.

use sofabolt_conn::ResponseWriter;
use sofabolt_protocol::Request;
use sofabolt_server::{Config, Server, ServerError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if SOFABOLT_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("SOFABOLT_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let server_config = config.server_config();
    tracing::info!("Starting sofabolt echo server");
    tracing::info!("  Bind address: {}", server_config.bind_addr);
    tracing::info!(
        "  Dispatch: {}",
        if server_config.async_dispatch {
            "async"
        } else {
            "sync"
        }
    );
    tracing::info!("  Max connections: {}", server_config.max_connections);

    let delay = config.echo.delay();
    if !delay.is_zero() {
        tracing::info!("  Echo delay: {:?}", delay);
    }
    let handler = move |mut rw: ResponseWriter, req: Request| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        rw.response_mut().set_content(req.content());
        if let Err(e) = rw.write().await {
            tracing::debug!("Echo reply not written: {}", e);
        }
    };
    let server = Server::new(server_config, handler)?;

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let deadline = config.shutdown.deadline();
    let shutdown = tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        match shutdown_server.shutdown(deadline).await {
            Ok(()) => {}
            Err(ServerError::ShutdownTimeout(n)) => {
                tracing::warn!("{} connections were closed forcibly", n);
            }
            Err(e) => tracing::error!("Shutdown failed: {}", e),
        }
    });

    // Run server (returns once accepting stops)
    server.run().await?;
    let _ = shutdown.await;

    tracing::info!("Server stopped");
    Ok(())
}
