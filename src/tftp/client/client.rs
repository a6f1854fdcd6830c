use std::fs::{File, OpenOptions};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use anyhow::Context;
use tokio::net::UdpSocket;

use super::config::ClientConfig;
use crate::tftp::core::options::DEFAULT_BLOCK_SIZE;
use crate::tftp::core::{OptionType, Session, TransferOption};
use crate::tftp::server::Worker;

/// TFTP client
///
/// Supports file upload (PUT) and download (GET) operations
///
/// # Example
///
/// ```rust,no_run
/// use xtftp::tftp::client::{Client, ClientConfig};
/// use std::path::Path;
///
/// # async fn demo() -> anyhow::Result<()> {
/// let config = ClientConfig::new("192.168.1.100".parse().unwrap(), 69);
/// let client = Client::new(config);
///
/// // Download file
/// client.get("remote.txt", Path::new("local.txt")).await?;
///
/// // Upload file
/// client.put(Path::new("local.txt"), "remote.txt").await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: ClientConfig,
}

impl Client {
    /// Create a new TFTP client
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.server_ip, self.config.server_port)
    }

    /// Download a file from the server (RRQ - Read Request)
    ///
    /// The local file must not exist yet; it is removed again if the
    /// transfer fails. Returns the number of bytes received.
    pub async fn get(&self, remote_file: &str, local_file: &Path) -> anyhow::Result<u64> {
        log::info!("Downloading {} to {}", remote_file, local_file.display());

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(local_file)
            .with_context(|| format!("Failed to create {}", local_file.display()))?;

        let session = Session::client_get(
            self.server_addr(),
            remote_file,
            self.config.mode,
            self.requested_options(0),
            Box::new(file),
            self.config.opt_local,
        );

        match self.transfer(session).await {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                if let Err(remove) = std::fs::remove_file(local_file) {
                    log::warn!(
                        "Could not remove partial file {}: {}",
                        local_file.display(),
                        remove
                    );
                }
                Err(err.context(format!("Failed to download {}", remote_file)))
            }
        }
    }

    /// Upload a file to the server (WRQ - Write Request)
    ///
    /// Returns the number of bytes sent.
    pub async fn put(&self, local_file: &Path, remote_file: &str) -> anyhow::Result<u64> {
        log::info!("Uploading {} to {}", local_file.display(), remote_file);

        let file = File::open(local_file)
            .with_context(|| format!("Failed to open {}", local_file.display()))?;
        let size = file.metadata()?.len();

        let session = Session::client_put(
            self.server_addr(),
            remote_file,
            self.config.mode,
            self.requested_options(size),
            Box::new(file),
            self.config.opt_local,
        );

        self.transfer(session)
            .await
            .with_context(|| format!("Failed to upload {}", local_file.display()))
    }

    async fn transfer(&self, session: Session) -> anyhow::Result<u64> {
        let local: IpAddr = match self.config.server_ip {
            IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        let socket = UdpSocket::bind(SocketAddr::new(local, 0))
            .await
            .context("Failed to bind client socket")?;
        Ok(Worker::new(socket, session).run().await?)
    }

    /// Options worth asking for; RFC defaults are left out.
    fn requested_options(&self, tsize: u64) -> Vec<(String, String)> {
        let mut options = Vec::new();
        if self.config.block_size != DEFAULT_BLOCK_SIZE {
            options.push(TransferOption {
                option: OptionType::BlockSize,
                value: u64::from(self.config.block_size),
            });
        }
        if self.config.window_size > 1 {
            options.push(TransferOption {
                option: OptionType::WindowSize,
                value: u64::from(self.config.window_size),
            });
        }
        if let Some(timeout) = self.config.timeout {
            options.push(TransferOption {
                option: OptionType::Timeout,
                value: timeout,
            });
        }
        options.push(TransferOption {
            option: OptionType::TransferSize,
            value: tsize,
        });
        options.iter().map(TransferOption::to_pair).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn requests_only_non_default_options() {
        let config = ClientConfig::new("127.0.0.1".parse().unwrap(), 69);
        let client = Client::new(config.clone());
        assert_eq!(client.requested_options(0), pairs(&[("tsize", "0")]));

        let client = Client::new(config.with_block_size(1428).with_window_size(4));
        assert_eq!(
            client.requested_options(99),
            pairs(&[("blksize", "1428"), ("windowsize", "4"), ("tsize", "99")])
        );
    }
}
