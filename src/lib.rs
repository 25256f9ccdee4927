#![doc = concat!(
    "[![crates.io](https://img.shields.io/crates/v/", env!("CARGO_PKG_NAME"), ")](https://crates.io/crates/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "[![docs.rs](https://img.shields.io/docsrs/", env!("CARGO_PKG_NAME"), ")](https://docs.rs/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "![license](https://img.shields.io/crates/l/", env!("CARGO_PKG_NAME"), ")"
)]
#![doc = ""]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! The [`Transport`] wraps an established byte stream and turns it into an
//! authenticated, packet-oriented channel: it runs the identification
//! exchange, negotiates and performs key exchanges (initial and rekeys),
//! frames packets through the per-direction cipher/mac/compression
//! pipelines and routes the decoded traffic to the active [`Service`].
//!
//! ### Supported algorithms
//!
//! #### Key-exchange:
//! see [`algorithm::Kex`].
//!
//! #### Encryption:
//! see [`algorithm::Cipher`].
//!
//! #### MACs:
//! see [`algorithm::Hmac`].
//!
//! #### Compression:
//! see [`algorithm::Compress`].

#![warn(
    missing_docs,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,
    clippy::undocumented_unsafe_blocks
)]
#![forbid(unsafe_code)]

/// Decoded packets and compressed payloads are bounded by 256 KiB.
pub const PACKET_MAX_SIZE: usize = 0x40000;

mod error;
pub use error::{DisconnectedBy, DisconnectedError, Error, Result};

mod buffer;
pub use buffer::{Buffer, NameList, MAX_STRING_SIZE};

pub mod msg;

pub mod algorithm;

mod config;
pub use config::{Algorithms, Config};

mod service;
pub use service::Service;

mod sync;

mod transport;
pub use transport::{HostKeyVerifier, Socket, State, Transport};
