use std::net::IpAddr;

use anyhow::{Result, ensure};

use crate::config::ClientSection;
use crate::tftp::core::options::{DEFAULT_BLOCK_SIZE, OptionsPrivate};
use crate::tftp::core::TransferMode;

/// TFTP client configuration
///
/// # Example
///
/// ```rust
/// use xtftp::tftp::client::ClientConfig;
///
/// let config = ClientConfig::new("192.168.1.100".parse().unwrap(), 69)
///     .with_block_size(1428)
///     .with_window_size(8);
/// assert_eq!(config.window_size, 8);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server IP address
    pub server_ip: IpAddr,
    /// Server port number
    pub server_port: u16,
    /// Block size to request (512 requests nothing)
    pub block_size: u16,
    /// Window size to request (RFC 7440, 1 requests nothing)
    pub window_size: u16,
    /// Retransmit interval to request, in seconds
    pub timeout: Option<u64>,
    pub mode: TransferMode,
    /// Internal timers (retransmit interval, idle timeout)
    pub opt_local: OptionsPrivate,
}

impl ClientConfig {
    /// Create new client configuration
    ///
    /// # Arguments
    ///
    /// * `server_ip` - Server IP address
    /// * `server_port` - Server port number (usually 69)
    pub fn new(server_ip: IpAddr, server_port: u16) -> Self {
        Self {
            server_ip,
            server_port,
            block_size: DEFAULT_BLOCK_SIZE,
            window_size: 1,
            timeout: None,
            mode: TransferMode::Octet,
            opt_local: OptionsPrivate::default(),
        }
    }

    /// Set block size
    pub fn with_block_size(mut self, block_size: u16) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set window size
    pub fn with_window_size(mut self, window_size: u16) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_mode(mut self, mode: TransferMode) -> Self {
        self.mode = mode;
        self
    }

    /// Apply the `[client]` section of a config file
    pub fn merge_file(mut self, section: &ClientSection) -> Result<Self> {
        if let Some(port) = section.port {
            self.server_port = port;
        }
        if let Some(block_size) = section.blksize {
            self.block_size = block_size;
        }
        if let Some(window_size) = section.windowsize {
            self.window_size = window_size;
        }
        if section.timeout.is_some() {
            self.timeout = section.timeout;
        }
        if let Some(mode) = &section.mode {
            self.mode = TransferMode::parse(mode)?;
        }
        if let Some(timeout) = section.retransmit_timeout {
            self.opt_local.retransmit_timeout = timeout;
        }
        if let Some(timeout) = section.connection_timeout {
            self.opt_local.connection_timeout = timeout;
        }
        ensure!(
            !self.opt_local.retransmit_timeout.is_zero()
                && !self.opt_local.connection_timeout.is_zero(),
            "retransmit_timeout and connection_timeout must be greater than zero"
        );
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_section_applies() {
        let section = ClientSection {
            port: Some(6969),
            blksize: Some(1024),
            mode: Some("NetASCII".to_string()),
            ..Default::default()
        };
        let config = ClientConfig::new("127.0.0.1".parse().unwrap(), 69)
            .merge_file(&section)
            .unwrap();
        assert_eq!(config.server_port, 6969);
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.window_size, 1);
        assert_eq!(config.mode, TransferMode::Netascii);

        let bad = ClientSection {
            mode: Some("mail".to_string()),
            ..Default::default()
        };
        assert!(ClientConfig::new("127.0.0.1".parse().unwrap(), 69)
            .merge_file(&bad)
            .is_err());

        let stalled = ClientSection {
            retransmit_timeout: Some(std::time::Duration::ZERO),
            ..Default::default()
        };
        assert!(ClientConfig::new("127.0.0.1".parse().unwrap(), 69)
            .merge_file(&stalled)
            .is_err());
    }
}
