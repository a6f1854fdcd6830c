//! TFTP (Trivial File Transfer Protocol) implementation
//!
//! This module implements the complete TFTP protocol, based on the following RFC standards:
//! - [RFC 1350](https://www.rfc-editor.org/rfc/rfc1350) TFTP Protocol version 2
//! - [RFC 2347](https://www.rfc-editor.org/rfc/rfc2347) TFTP Option Extension
//! - [RFC 2348](https://www.rfc-editor.org/rfc/rfc2348) Blocksize Option
//! - [RFC 2349](https://www.rfc-editor.org/rfc/rfc2349) Timeout and Transfer Size Options
//! - [RFC 7440](https://www.rfc-editor.org/rfc/rfc7440) Windowsize Option
//!
//! ## Module Structure
//!
//! ```text
//! tftp/
//! ├── core/           # Core protocol implementation
//! │   ├── packet      # Packet serialization/deserialization
//! │   ├── options     # Option negotiation
//! │   ├── convert     # NETASCII conversion
//! │   ├── window      # Windowed transfer
//! │   ├── session     # Transfer state machine (no I/O)
//! │   ├── fs          # Sandboxed file access
//! │   └── error       # Errors and RFC error codes
//! │
//! ├── server/         # TFTP server
//! │   ├── server      # Listening socket, request dispatch
//! │   ├── worker      # Per-transfer socket driver
//! │   └── config      # Server configuration
//! │
//! └── client/         # TFTP client
//!     ├── client      # GET / PUT
//!     └── config      # Client configuration
//! ```
//!
//! ## Usage Examples
//!
//! ### Start TFTP Server
//!
//! ```rust,no_run
//! use xtftp::tftp::server::{Config, Server};
//! use std::path::PathBuf;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::with_defaults().merge_cli(
//!     Some("0.0.0.0".parse().unwrap()),
//!     Some(69),
//!     Some(PathBuf::from("/var/tftp")),
//!     None,
//! );
//!
//! let mut server = Server::bind(&config).await?;
//! server.listen().await?;
//! # Ok(())
//! # }
//! ```

// Submodules
pub mod client;
pub mod core;
pub mod server;
