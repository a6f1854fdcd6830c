use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use super::packet::{ErrorCode, Packet};

/// Everything that can end a transfer, or reject a datagram before one starts.
///
/// Terminal session states carry one of these, so it stays `Clone` and
/// holds I/O failures as text rather than as `io::Error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TftpError {
    /// Wire data violates TFTP framing.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A string field handed to the encoder contains a NUL byte.
    #[error("{0} contains an embedded NUL byte")]
    EmbeddedNul(&'static str),

    #[error("file not found")]
    FileNotFound,

    #[error("file already exists")]
    FileExists,

    #[error("access violation")]
    AccessViolation,

    #[error("disk full or allocation exceeded")]
    DiskFull,

    /// A datagram from an address other than the transfer's peer.
    #[error("unrecognized transfer id {0}")]
    UnknownTransferId(SocketAddr),

    /// No valid datagram within the connection timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Wrong packet type for the session's direction or phase.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer sent an Error packet.
    #[error("peer reported {code}: {message}")]
    Peer { code: ErrorCode, message: String },

    #[error("unsupported transfer mode {0:?}")]
    UnsupportedMode(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl TftpError {
    /// Classify a file-system failure the way the peer should hear about it.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::FileNotFound,
            io::ErrorKind::AlreadyExists => Self::FileExists,
            io::ErrorKind::PermissionDenied => Self::AccessViolation,
            io::ErrorKind::StorageFull => Self::DiskFull,
            _ => Self::Io(err.to_string()),
        }
    }

    /// The Error packet announcing this failure to the peer.
    pub fn to_packet(&self) -> Packet {
        let code = match self {
            Self::FileNotFound => ErrorCode::FileNotFound,
            Self::AccessViolation => ErrorCode::AccessViolation,
            Self::DiskFull => ErrorCode::DiskFull,
            Self::UnsupportedMode(_) | Self::ProtocolViolation(_) => ErrorCode::IllegalOperation,
            Self::UnknownTransferId(_) => ErrorCode::UnknownTransferId,
            Self::FileExists => ErrorCode::FileExists,
            Self::Io(msg) => {
                return Packet::Error {
                    code: ErrorCode::NotDefined,
                    msg: msg.clone(),
                };
            }
            _ => ErrorCode::NotDefined,
        };
        Packet::error(code)
    }
}

impl From<io::Error> for TftpError {
    fn from(err: io::Error) -> Self {
        Self::from_io(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_rfc_codes() {
        let not_found = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(
            TftpError::from_io(&not_found).to_packet(),
            Packet::Error {
                code: ErrorCode::FileNotFound,
                msg: "File not found".to_string()
            }
        );

        let exists = io::Error::from(io::ErrorKind::AlreadyExists);
        assert_eq!(TftpError::from(exists), TftpError::FileExists);

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            TftpError::from(denied).to_packet(),
            Packet::Error { code: ErrorCode::AccessViolation, .. }
        ));
    }

    #[test]
    fn unknown_tid_reply() {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(
            TftpError::UnknownTransferId(addr).to_packet(),
            Packet::Error {
                code: ErrorCode::UnknownTransferId,
                msg: "Unrecognized transfer id".to_string()
            }
        );
    }
}
