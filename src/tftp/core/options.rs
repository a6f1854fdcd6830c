//! Protocol options and parameters
//!
//! Options requested by a peer are validated one at a time; anything
//! unrecognized or out of range is left out of the accepted set rather
//! than reported (RFC 2347). Accepted values then override the server's
//! defaults, which themselves may be overridden by configuration.

use std::time::Duration;

use super::error::TftpError;

pub const DEFAULT_BLOCK_SIZE: u16 = 512;
pub const MAX_BLOCK_SIZE: u64 = 65464;
pub const MIN_BLOCK_SIZE: u64 = 8;
pub const MAX_WINDOW_SIZE: u64 = 65535;
pub const MIN_WINDOW_SIZE: u64 = 1;
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 255;

/// Options this implementation understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionType {
    /// `blksize`, RFC 2348
    BlockSize,
    /// `timeout`, RFC 2349
    Timeout,
    /// `tsize`, RFC 2349
    TransferSize,
    /// `windowsize`, RFC 7440
    WindowSize,
}

impl OptionType {
    pub const ALL: [OptionType; 4] = [
        OptionType::BlockSize,
        OptionType::Timeout,
        OptionType::TransferSize,
        OptionType::WindowSize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OptionType::BlockSize => "blksize",
            OptionType::Timeout => "timeout",
            OptionType::TransferSize => "tsize",
            OptionType::WindowSize => "windowsize",
        }
    }

    /// Option names are case-insensitive on the wire.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|option| option.as_str().eq_ignore_ascii_case(name))
    }

    /// Range-check (and possibly clamp) a requested value.
    pub fn validate(self, value: u64) -> Option<u64> {
        match self {
            OptionType::BlockSize => ensure_blksize(value),
            OptionType::Timeout => ensure_timeout(value),
            OptionType::TransferSize => ensure_tsize(value),
            OptionType::WindowSize => ensure_windowsize(value),
        }
    }
}

/// Values above the maximum are clamped; values at or below 8 are refused.
pub fn ensure_blksize(value: u64) -> Option<u64> {
    if value <= MIN_BLOCK_SIZE {
        None
    } else {
        Some(value.min(MAX_BLOCK_SIZE))
    }
}

pub fn ensure_timeout(value: u64) -> Option<u64> {
    (MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS)
        .contains(&value)
        .then_some(value)
}

pub fn ensure_tsize(value: u64) -> Option<u64> {
    Some(value)
}

/// Values above 65535 are clamped; values at or below 1 are refused.
pub fn ensure_windowsize(value: u64) -> Option<u64> {
    if value <= MIN_WINDOW_SIZE {
        None
    } else {
        Some(value.min(MAX_WINDOW_SIZE))
    }
}

/// One accepted option with its validated value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOption {
    pub option: OptionType,
    pub value: u64,
}

impl TransferOption {
    /// Wire form: the option name and its decimal value.
    pub fn to_pair(&self) -> (String, String) {
        (self.option.as_str().to_string(), self.value.to_string())
    }
}

/// Validate the options a peer asked for.
///
/// Only names present in `supported` are considered. Order follows the
/// request; a repeated name keeps its first valid occurrence.
pub fn negotiate(requested: &[(String, String)], supported: &[OptionType]) -> Vec<TransferOption> {
    let mut accepted: Vec<TransferOption> = Vec::new();

    for (name, value) in requested {
        let Some(option) = OptionType::from_name(name) else {
            log::debug!("Ignoring unsupported option {}={}", name, value);
            continue;
        };
        if !supported.contains(&option) || accepted.iter().any(|o| o.option == option) {
            continue;
        }
        match value.trim().parse::<u64>().ok().and_then(|v| option.validate(v)) {
            Some(value) => accepted.push(TransferOption { option, value }),
            None => log::debug!("Dropping option {} with invalid value {:?}", name, value),
        }
    }

    accepted
}

/// Wire form of an accepted option set, suitable for an OACK.
pub fn to_pairs(accepted: &[TransferOption]) -> Vec<(String, String)> {
    accepted.iter().map(TransferOption::to_pair).collect()
}

/// Parameters that govern one transfer, agreed with the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionsProtocol {
    pub block_size: u16,
    pub window_size: u16,
    /// Retransmit interval
    pub timeout: Duration,
    pub transfer_size: Option<u64>,
}

impl Default for OptionsProtocol {
    fn default() -> Self {
        Self::with_timeout(OptionsPrivate::default().retransmit_timeout)
    }
}

impl OptionsProtocol {
    /// RFC defaults with the given retransmit interval.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            window_size: 1,
            timeout,
            transfer_size: None,
        }
    }

    /// Defaults, then the server's retransmit override, then whatever the
    /// peer negotiated.
    ///
    /// Block and window size reach the wire, so they only change through
    /// `accepted`; see [`OptionsOverride::cap`].
    pub fn merged(
        local: &OptionsPrivate,
        overrides: &OptionsOverride,
        accepted: &[TransferOption],
    ) -> Self {
        let mut opts = Self::with_timeout(local.retransmit_timeout);
        if let Some(secs) = overrides.timeout {
            opts.timeout = Duration::from_secs(secs);
        }
        opts.apply(accepted);
        opts
    }

    pub fn apply(&mut self, accepted: &[TransferOption]) {
        for opt in accepted {
            match opt.option {
                // Validators have already bounded these to fit.
                OptionType::BlockSize => self.block_size = opt.value.min(MAX_BLOCK_SIZE) as u16,
                OptionType::WindowSize => {
                    self.window_size = opt.value.min(MAX_WINDOW_SIZE) as u16
                }
                OptionType::Timeout => self.timeout = Duration::from_secs(opt.value),
                OptionType::TransferSize => self.transfer_size = Some(opt.value),
            }
        }
    }

    /// Adopt the values a server acknowledged in its OACK.
    ///
    /// A server may only acknowledge options that were requested, with
    /// values that are in range; anything else is a protocol violation.
    pub fn parse_acknowledged(
        &self,
        requested: &[(String, String)],
        oack: &[(String, String)],
    ) -> Result<Self, TftpError> {
        let mut opts = *self;
        for (name, value) in oack {
            let option = OptionType::from_name(name)
                .filter(|o| requested.iter().any(|(r, _)| OptionType::from_name(r) == Some(*o)))
                .ok_or_else(|| {
                    TftpError::ProtocolViolation(format!("unrequested option {name:?} in OACK"))
                })?;
            let value = value
                .trim()
                .parse::<u64>()
                .ok()
                .and_then(|v| option.validate(v))
                .ok_or_else(|| {
                    TftpError::ProtocolViolation(format!("invalid {name} value {value:?} in OACK"))
                })?;
            opts.apply(&[TransferOption { option, value }]);
        }
        Ok(opts)
    }
}

/// Local timer settings that are never sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionsPrivate {
    /// Interval before an unacknowledged packet is sent again
    pub retransmit_timeout: Duration,
    /// Silence after which a transfer is abandoned
    pub connection_timeout: Duration,
}

impl Default for OptionsPrivate {
    fn default() -> Self {
        Self {
            retransmit_timeout: Duration::from_millis(500),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Server-imposed limits on what a peer may negotiate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionsOverride {
    /// Largest `blksize` the server will acknowledge
    pub block_size: Option<u16>,
    /// Largest `windowsize` the server will acknowledge
    pub window_size: Option<u16>,
    /// Retransmit interval in seconds
    pub timeout: Option<u64>,
}

impl OptionsOverride {
    /// Lower requested block and window sizes to the configured limits.
    ///
    /// Runs before the OACK is built, so the peer always learns the value
    /// in use. A peer that asked for nothing keeps the RFC defaults.
    pub fn cap(&self, accepted: &mut [TransferOption]) {
        for opt in accepted.iter_mut() {
            let limit = match opt.option {
                OptionType::BlockSize => self.block_size,
                OptionType::WindowSize => self.window_size,
                OptionType::Timeout | OptionType::TransferSize => None,
            };
            if let Some(limit) = limit {
                opt.value = opt.value.min(u64::from(limit));
            }
        }
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
    fn blksize_clamps_high_and_rejects_low() {
        assert_eq!(ensure_blksize(9), Some(9));
        assert_eq!(ensure_blksize(1428), Some(1428));
        assert_eq!(ensure_blksize(65464), Some(65464));
        assert_eq!(ensure_blksize(65465), Some(65464));
        assert_eq!(ensure_blksize(1_000_000), Some(65464));
        assert_eq!(ensure_blksize(8), None);
        assert_eq!(ensure_blksize(0), None);
    }

    #[test]
    fn windowsize_clamps_high_and_rejects_low() {
        assert_eq!(ensure_windowsize(2), Some(2));
        assert_eq!(ensure_windowsize(65535), Some(65535));
        assert_eq!(ensure_windowsize(70000), Some(65535));
        assert_eq!(ensure_windowsize(1), None);
        assert_eq!(ensure_windowsize(0), None);
    }

    #[test]
    fn timeout_and_tsize_bounds() {
        assert_eq!(ensure_timeout(0), None);
        assert_eq!(ensure_timeout(1), Some(1));
        assert_eq!(ensure_timeout(255), Some(255));
        assert_eq!(ensure_timeout(256), None);
        assert_eq!(ensure_tsize(0), Some(0));
        assert_eq!(ensure_tsize(u64::MAX), Some(u64::MAX));
    }

    #[test]
    fn negotiation_drops_unknown_and_invalid() {
        let requested = pairs(&[
            ("BLKSIZE", "100000"),
            ("multicast", ""),
            ("timeout", "0"),
            ("windowsize", "abc"),
            ("tsize", "0"),
        ]);
        let accepted = negotiate(&requested, &OptionType::ALL);
        assert_eq!(
            accepted,
            vec![
                TransferOption {
                    option: OptionType::BlockSize,
                    value: 65464
                },
                TransferOption {
                    option: OptionType::TransferSize,
                    value: 0
                },
            ]
        );
        assert_eq!(
            to_pairs(&accepted),
            pairs(&[("blksize", "65464"), ("tsize", "0")])
        );
    }

    #[test]
    fn negotiation_respects_supported_set() {
        let requested = pairs(&[("blksize", "1024"), ("windowsize", "8")]);
        let accepted = negotiate(&requested, &[OptionType::WindowSize]);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].option, OptionType::WindowSize);
    }

    #[test]
    fn merge_precedence() {
        let local = OptionsPrivate::default();
        let overrides = OptionsOverride {
            block_size: Some(1024),
            window_size: Some(4),
            timeout: Some(2),
        };
        let accepted = [TransferOption {
            option: OptionType::BlockSize,
            value: 2048,
        }];
        let opts = OptionsProtocol::merged(&local, &overrides, &accepted);
        assert_eq!(opts.block_size, 2048);
        assert_eq!(opts.window_size, 1);
        assert_eq!(opts.timeout, Duration::from_secs(2));
        assert_eq!(opts.transfer_size, None);

        let opts = OptionsProtocol::merged(&local, &overrides, &[]);
        assert_eq!(opts.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(opts.window_size, 1);
    }

    #[test]
    fn overrides_cap_requested_sizes() {
        let overrides = OptionsOverride {
            block_size: Some(1024),
            window_size: Some(4),
            timeout: Some(3),
        };
        let mut accepted = negotiate(
            &pairs(&[
                ("blksize", "2048"),
                ("windowsize", "2"),
                ("timeout", "10"),
                ("tsize", "0"),
            ]),
            &OptionType::ALL,
        );
        overrides.cap(&mut accepted);
        assert_eq!(
            to_pairs(&accepted),
            pairs(&[
                ("blksize", "1024"),
                ("windowsize", "2"),
                ("timeout", "10"),
                ("tsize", "0"),
            ])
        );
    }

    #[test]
    fn oack_must_echo_requested_options() {
        let requested = pairs(&[("blksize", "1024"), ("tsize", "0")]);
        let base = OptionsProtocol::default();

        let opts = base
            .parse_acknowledged(&requested, &pairs(&[("blksize", "1024"), ("tsize", "4000")]))
            .unwrap();
        assert_eq!(opts.block_size, 1024);
        assert_eq!(opts.transfer_size, Some(4000));

        assert!(matches!(
            base.parse_acknowledged(&requested, &pairs(&[("windowsize", "4")])),
            Err(TftpError::ProtocolViolation(_))
        ));
    }
}
