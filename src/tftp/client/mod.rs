//! TFTP client implementation
//!
//! One [`Client`] talks to one server; every `get`/`put` runs a single
//! transfer session on a fresh socket.

mod client;
mod config;

use std::path::Path;

use anyhow::Result;

use crate::config::TransferKind;

pub use client::Client;
pub use config::ClientConfig;

/// Run one transfer and report it
pub async fn run(config: ClientConfig, kind: TransferKind, source: &str, destination: &str) -> Result<()> {
    let server = format!("{}:{}", config.server_ip, config.server_port);
    let client = Client::new(config);
    let started = std::time::Instant::now();

    let bytes = match kind {
        TransferKind::Get => client.get(source, Path::new(destination)).await?,
        TransferKind::Put => client.put(Path::new(source), destination).await?,
    };

    log::info!(
        "{:?} {} -> {} via {}: {} bytes in {:.2?}",
        kind,
        source,
        destination,
        server,
        bytes,
        started.elapsed()
    );
    Ok(())
}
