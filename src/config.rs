//! Config file support
//!
//! Every key is optional; anything left out keeps its built-in default,
//! and command-line flags win over the file.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 6969
//! directory = "/srv/tftp"
//! restrict_modes = ["GET"]
//! retransmit_timeout = "500ms"
//! connection_timeout = "5s"
//! windowsize = 4
//!
//! [client]
//! port = 69
//! blksize = 1428
//! mode = "octet"
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;

/// Direction of a transfer, as named on the command line and in config
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
pub enum TransferKind {
    #[value(name = "GET")]
    #[serde(rename = "GET", alias = "get")]
    Get,
    #[value(name = "PUT")]
    #[serde(rename = "PUT", alias = "put")]
    Put,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub client: ClientSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub host: Option<IpAddr>,
    pub port: Option<u16>,
    pub directory: Option<PathBuf>,
    pub restrict_modes: Option<Vec<TransferKind>>,
    #[serde(with = "humantime_serde")]
    pub retransmit_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Option<Duration>,
    pub blksize: Option<u16>,
    pub windowsize: Option<u16>,
    /// Retransmit interval in seconds, as the `timeout` option would carry it
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSection {
    pub port: Option<u16>,
    pub blksize: Option<u16>,
    pub windowsize: Option<u16>,
    pub timeout: Option<u64>,
    pub mode: Option<String>,
    #[serde(with = "humantime_serde")]
    pub retransmit_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Option<Duration>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_sections() {
        let config = AppConfig::parse(
            r#"
            [server]
            host = "127.0.0.1"
            port = 7069
            restrict_modes = ["GET"]
            retransmit_timeout = "250ms"
            connection_timeout = "3s"
            windowsize = 8

            [client]
            blksize = 1428
            mode = "netascii"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, Some(7069));
        assert_eq!(config.server.restrict_modes, Some(vec![TransferKind::Get]));
        assert_eq!(
            config.server.retransmit_timeout,
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.server.connection_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.server.windowsize, Some(8));
        assert_eq!(config.client.blksize, Some(1428));
        assert_eq!(config.client.mode.as_deref(), Some("netascii"));
        assert_eq!(config.client.port, None);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.server.host.is_none());
        assert!(config.client.retransmit_timeout.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(AppConfig::parse("[server]\nprot = 1\n").is_err());
    }
}
