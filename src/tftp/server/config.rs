use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use anyhow::{Context, Result, ensure};

use crate::config::{ServerSection, TransferKind};
use crate::tftp::core::options::{
    OptionsOverride, OptionsPrivate, ensure_blksize, ensure_timeout, ensure_windowsize,
};

/// Conventional non-privileged stand-in for port 69
pub const DEFAULT_PORT: u16 = 6969;

/// TFTP server configuration
///
/// Built from defaults, then an optional config file section, then
/// command-line flags, each layer overriding the one before.
///
/// # Example
///
/// ```rust
/// use xtftp::tftp::server::Config;
/// use std::path::PathBuf;
///
/// let config = Config::with_defaults().merge_cli(
///     Some("127.0.0.1".parse().unwrap()),
///     Some(6969),
///     Some(PathBuf::from("/tmp/tftp")),
///     None,
/// );
/// assert!(config.allow_get && config.allow_put);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// IP address to listen on
    pub ip_address: IpAddr,
    /// Port number to listen on
    pub port: u16,
    /// Directory files are served from and written to
    pub directory: PathBuf,
    /// Serve read requests
    pub allow_get: bool,
    /// Serve write requests
    pub allow_put: bool,
    /// Internal timers (retransmit interval, idle timeout)
    pub opt_local: OptionsPrivate,
    /// Limits on negotiated sizes and a fixed retransmit interval
    pub opt_override: OptionsOverride,
}

impl Config {
    /// Create a new configuration serving `directory` in both directions
    pub fn new(ip_address: IpAddr, port: u16, directory: PathBuf) -> Self {
        Self {
            ip_address,
            port,
            directory,
            allow_get: true,
            allow_put: true,
            opt_local: OptionsPrivate::default(),
            opt_override: OptionsOverride::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            DEFAULT_PORT,
            PathBuf::from("."),
        )
    }

    /// Only serve the listed kinds of transfer
    pub fn with_modes(mut self, modes: &[TransferKind]) -> Self {
        self.allow_get = modes.contains(&TransferKind::Get);
        self.allow_put = modes.contains(&TransferKind::Put);
        self
    }

    /// Apply the `[server]` section of a config file
    ///
    /// Option values go through the same validators as a peer's request;
    /// out-of-range values are refused, oversized ones clamped.
    pub fn merge_file(mut self, section: &ServerSection) -> Result<Self> {
        if let Some(host) = section.host {
            self.ip_address = host;
        }
        if let Some(port) = section.port {
            self.port = port;
        }
        if let Some(directory) = &section.directory {
            self.directory = directory.clone();
        }
        if let Some(modes) = &section.restrict_modes {
            self = self.with_modes(modes);
        }
        if let Some(timeout) = section.retransmit_timeout {
            self.opt_local.retransmit_timeout = timeout;
        }
        if let Some(timeout) = section.connection_timeout {
            self.opt_local.connection_timeout = timeout;
        }
        if let Some(blksize) = section.blksize {
            let value = ensure_blksize(u64::from(blksize))
                .with_context(|| format!("Invalid blksize {blksize}: must be greater than 8"))?;
            self.opt_override.block_size = Some(value as u16);
        }
        if let Some(windowsize) = section.windowsize {
            let value = ensure_windowsize(u64::from(windowsize)).with_context(|| {
                format!("Invalid windowsize {windowsize}: must be greater than 1")
            })?;
            self.opt_override.window_size = Some(value as u16);
        }
        if let Some(timeout) = section.timeout {
            let value = ensure_timeout(timeout)
                .with_context(|| format!("Invalid timeout {timeout}: must be 1 to 255 seconds"))?;
            self.opt_override.timeout = Some(value);
        }
        self.validate()?;
        Ok(self)
    }

    /// Refuse settings no transfer could run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.opt_local.retransmit_timeout.is_zero(),
            "retransmit_timeout must be greater than zero"
        );
        ensure!(
            !self.opt_local.connection_timeout.is_zero(),
            "connection_timeout must be greater than zero"
        );
        if let Some(blksize) = self.opt_override.block_size {
            ensure!(
                ensure_blksize(u64::from(blksize)).is_some(),
                "Invalid blksize {blksize}: must be greater than 8"
            );
        }
        if let Some(windowsize) = self.opt_override.window_size {
            ensure!(
                ensure_windowsize(u64::from(windowsize)).is_some(),
                "Invalid windowsize {windowsize}: must be greater than 1"
            );
        }
        if let Some(timeout) = self.opt_override.timeout {
            ensure!(
                ensure_timeout(timeout).is_some(),
                "Invalid timeout {timeout}: must be 1 to 255 seconds"
            );
        }
        Ok(())
    }

    /// Apply command-line flags; `None` leaves the current value alone
    pub fn merge_cli(
        mut self,
        host: Option<IpAddr>,
        port: Option<u16>,
        directory: Option<PathBuf>,
        restrict_modes: Option<&[TransferKind]>,
    ) -> Self {
        if let Some(host) = host {
            self.ip_address = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(directory) = directory {
            self.directory = directory;
        }
        if let Some(modes) = restrict_modes {
            self = self.with_modes(modes);
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_defaults()
    }
}
