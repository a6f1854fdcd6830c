//! TFTP core protocol implementation
//!
//! This module contains the core components of the TFTP protocol:
//! - `packet`: Packet serialization and deserialization
//! - `options`: Option negotiation and transfer parameters
//! - `convert`: NETASCII conversion
//! - `window`: Windowed transfer management
//! - `session`: Per-transfer state machine, free of socket I/O
//! - `fs`: File access rooted in the served directory
//! - `error`: Errors and their wire codes

mod convert;
mod error;
mod fs;
pub mod options;
mod packet;
mod session;
mod window;

// Public core types
pub use convert::{NetasciiReader, NetasciiWriter, from_netascii, to_netascii};
pub use error::TftpError;
pub use fs::{FileAccess, ReadHandle, RootedFiles};
pub use options::{OptionType, OptionsOverride, OptionsPrivate, OptionsProtocol, TransferOption};
pub use packet::{ErrorCode, MAX_DATAGRAM, Opcode, Packet, TransferMode};
pub use session::{Outbound, Session, Settings, State};
pub use window::Window;
