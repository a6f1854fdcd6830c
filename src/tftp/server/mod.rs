//! TFTP server implementation
//!
//! This module provides complete TFTP server functionality:
//! - `server`: Listening socket and request dispatch
//! - `worker`: Drives one transfer session over its own socket
//! - `config`: Server configuration

mod config;
mod server;
mod worker;

use anyhow::Result;

// Public server types
pub use config::{Config, DEFAULT_PORT};
pub use server::{Server, ShutdownHandle};
pub use worker::Worker;

/// Run the TFTP server until Ctrl+C
pub async fn run(config: Config) -> Result<()> {
    log::info!(
        "Starting TFTP server on {}:{}",
        config.ip_address,
        config.port
    );
    log::info!("Root directory: {}", config.directory.display());
    log::info!(
        "Serving GET: {}, PUT: {}",
        config.allow_get,
        config.allow_put
    );

    let mut server = Server::bind(&config).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl+C, shutting down");
            shutdown.shutdown();
        }
    });

    log::info!(
        "TFTP server listening on {}, press Ctrl+C to stop",
        server.local_addr()?
    );
    server.listen().await
}
