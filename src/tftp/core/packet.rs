//! Packet serialization and deserialization
//!
//! Wire layouts (all integers are big-endian `u16`):
//!
//! ```text
//! RRQ/WRQ | 01/02 | filename | 0 | mode | 0 | (name | 0 | value | 0)* |
//! DATA    | 03    | block    | payload                               |
//! ACK     | 04    | block    |
//! ERROR   | 05    | code     | message | 0 |
//! OACK    | 06    | (name | 0 | value | 0)* |
//! ```

use std::fmt;

use super::error::TftpError;

/// Largest datagram a peer may legitimately send: opcode, block and a
/// maximum-size (65464 byte) payload.
pub const MAX_DATAGRAM: usize = 4 + 65464;

/// Packet opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
    Oack = 6,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Rrq),
            2 => Some(Self::Wrq),
            3 => Some(Self::Data),
            4 => Some(Self::Ack),
            5 => Some(Self::Error),
            6 => Some(Self::Oack),
            _ => None,
        }
    }
}

/// Error codes from RFC 1350, plus code 8 from RFC 2347
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileExists = 6,
    NoSuchUser = 7,
    OptionNegotiation = 8,
}

impl ErrorCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::NotDefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileExists),
            7 => Some(Self::NoSuchUser),
            8 => Some(Self::OptionNegotiation),
            _ => None,
        }
    }

    /// Message sent alongside the code when there is nothing more specific to say
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotDefined => "Undefined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Permission denied",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unrecognized transfer id",
            Self::FileExists => "File already exists",
            Self::NoSuchUser => "No such user",
            Self::OptionNegotiation => "Option negotiation failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), *self as u16)
    }
}

/// Transfer mode carried by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Netascii,
    Octet,
}

impl TransferMode {
    /// Mode names are matched case-insensitively.
    pub fn parse(mode: &str) -> Result<Self, TftpError> {
        if mode.eq_ignore_ascii_case("octet") {
            Ok(Self::Octet)
        } else if mode.eq_ignore_ascii_case("netascii") {
            Ok(Self::Netascii)
        } else {
            Err(TftpError::UnsupportedMode(mode.to_string()))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Netascii => "netascii",
            Self::Octet => "octet",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded TFTP packet
///
/// Option lists keep the order they had on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Rrq {
        filename: String,
        mode: String,
        options: Vec<(String, String)>,
    },
    Wrq {
        filename: String,
        mode: String,
        options: Vec<(String, String)>,
    },
    Data {
        block_num: u16,
        data: Vec<u8>,
    },
    Ack(u16),
    Error {
        code: ErrorCode,
        msg: String,
    },
    Oack(Vec<(String, String)>),
}

impl Packet {
    /// An Error packet with the code's standard message.
    pub fn error(code: ErrorCode) -> Self {
        Packet::Error {
            code,
            msg: code.default_message().to_string(),
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::Rrq { .. } => Opcode::Rrq,
            Packet::Wrq { .. } => Opcode::Wrq,
            Packet::Data { .. } => Opcode::Data,
            Packet::Ack(_) => Opcode::Ack,
            Packet::Error { .. } => Opcode::Error,
            Packet::Oack(_) => Opcode::Oack,
        }
    }

    /// Encode to wire bytes. Fails if any string field contains NUL.
    pub fn serialize(&self) -> Result<Vec<u8>, TftpError> {
        let mut buf = Vec::with_capacity(self.encoded_len_hint());
        buf.extend_from_slice(&(self.opcode() as u16).to_be_bytes());

        match self {
            Packet::Rrq {
                filename,
                mode,
                options,
            }
            | Packet::Wrq {
                filename,
                mode,
                options,
            } => {
                put_str(&mut buf, filename, "filename")?;
                put_str(&mut buf, mode, "mode")?;
                put_options(&mut buf, options)?;
            }
            Packet::Data { block_num, data } => {
                buf.extend_from_slice(&block_num.to_be_bytes());
                buf.extend_from_slice(data);
            }
            Packet::Ack(block_num) => {
                buf.extend_from_slice(&block_num.to_be_bytes());
            }
            Packet::Error { code, msg } => {
                buf.extend_from_slice(&(*code as u16).to_be_bytes());
                put_str(&mut buf, msg, "error message")?;
            }
            Packet::Oack(options) => put_options(&mut buf, options)?,
        }

        Ok(buf)
    }

    /// Decode wire bytes.
    pub fn deserialize(buf: &[u8]) -> Result<Self, TftpError> {
        let opcode = read_u16(buf, 0).ok_or_else(|| malformed("truncated opcode"))?;
        let opcode =
            Opcode::from_u16(opcode).ok_or_else(|| malformed(format!("unknown opcode {opcode}")))?;
        let body = &buf[2..];

        match opcode {
            Opcode::Rrq | Opcode::Wrq => {
                let mut fields = split_strings(body)?.into_iter();
                let (Some(filename), Some(mode)) = (fields.next(), fields.next()) else {
                    return Err(malformed("request without filename and mode"));
                };
                let options = pair_up(fields)?;
                Ok(if opcode == Opcode::Rrq {
                    Packet::Rrq {
                        filename,
                        mode,
                        options,
                    }
                } else {
                    Packet::Wrq {
                        filename,
                        mode,
                        options,
                    }
                })
            }
            Opcode::Data => {
                let block_num = read_u16(body, 0).ok_or_else(|| malformed("truncated block number"))?;
                Ok(Packet::Data {
                    block_num,
                    data: body[2..].to_vec(),
                })
            }
            Opcode::Ack => {
                let block_num = read_u16(body, 0).ok_or_else(|| malformed("truncated block number"))?;
                Ok(Packet::Ack(block_num))
            }
            Opcode::Error => {
                let code = read_u16(body, 0).ok_or_else(|| malformed("truncated error code"))?;
                let code = ErrorCode::from_u16(code)
                    .ok_or_else(|| malformed(format!("unknown error code {code}")))?;
                // Tolerate a missing terminator on the message.
                let text = &body[2..];
                let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
                Ok(Packet::Error {
                    code,
                    msg: String::from_utf8_lossy(&text[..end]).into_owned(),
                })
            }
            Opcode::Oack => Ok(Packet::Oack(pair_up(split_strings(body)?.into_iter())?)),
        }
    }

    fn encoded_len_hint(&self) -> usize {
        match self {
            Packet::Data { data, .. } => 4 + data.len(),
            _ => 64,
        }
    }
}

fn malformed(reason: impl Into<String>) -> TftpError {
    TftpError::MalformedPacket(reason.into())
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    let bytes = buf.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn put_str(buf: &mut Vec<u8>, s: &str, field: &'static str) -> Result<(), TftpError> {
    if s.as_bytes().contains(&0) {
        return Err(TftpError::EmbeddedNul(field));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn put_options(buf: &mut Vec<u8>, options: &[(String, String)]) -> Result<(), TftpError> {
    for (name, value) in options {
        put_str(buf, name, "option name")?;
        put_str(buf, value, "option value")?;
    }
    Ok(())
}

/// Split a run of NUL-terminated strings. Every string must be terminated.
fn split_strings(body: &[u8]) -> Result<Vec<String>, TftpError> {
    let Some((last, rest)) = body.split_last() else {
        return Ok(Vec::new());
    };
    if *last != 0 {
        return Err(malformed("unterminated string field"));
    }
    rest.split(|&b| b == 0)
        .map(|field| {
            String::from_utf8(field.to_vec()).map_err(|_| malformed("string field is not UTF-8"))
        })
        .collect()
}

fn pair_up(mut fields: impl Iterator<Item = String>) -> Result<Vec<(String, String)>, TftpError> {
    let mut options = Vec::new();
    while let Some(name) = fields.next() {
        let value = fields
            .next()
            .ok_or_else(|| malformed(format!("option {name:?} has no value")))?;
        options.push((name, value));
    }
    Ok(options)
}
