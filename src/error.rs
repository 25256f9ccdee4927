//! Collection of error handling types and aliases.

use std::sync::Arc;

use thiserror::Error;

use crate::msg::DisconnectReason;

/// The disconnection side for [`DisconnectedError`].
#[derive(Debug, Clone, Copy)]
pub enum DisconnectedBy {
    /// The session has been disconnected by _us_.
    Us,

    /// The session has been disconnected by _them_.
    Them,
}

/// The error type describing disconnect.
#[must_use]
#[derive(Debug, Error, Clone)]
#[error("The session has been disconnected by {by:?} for {reason:?}: {description}")]
pub struct DisconnectedError {
    /// Side that sent the disconnect message.
    pub by: DisconnectedBy,

    /// Reason for disconnect.
    pub reason: DisconnectReason,

    /// Description of the disconnect reason.
    pub description: String,
}

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// I/O Error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A wire decode ran past the end of the buffer.
    #[error("Buffer underflow while decoding")]
    Underflow,

    /// A length prefix exceeded the accepted bound.
    #[error("Length prefix of {0} bytes exceeds the accepted bound")]
    Overflow(usize),

    /// The byte stream did not follow the protocol.
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// Packet integrity error.
    #[error(transparent)]
    Integrity(#[from] digest::MacError),

    /// Signature error during the key-exchange.
    #[error(transparent)]
    Signature(#[from] signature::Error),

    /// SSH Key error.
    #[error(transparent)]
    Key(#[from] ssh_key::Error),

    /// No common kex algorithm found between both sides.
    #[error("Unable to negotiate a common kex algorithm")]
    NoCommonKex,

    /// No common host key algorithm found between both sides.
    #[error("Unable to negotiate a common host key algorithm")]
    NoCommonKey,

    /// No common cipher algorithm found between both sides.
    #[error("Unable to negotiate a common encryption algorithm")]
    NoCommonCipher,

    /// No common hmac algorithm found between both sides.
    #[error("Unable to negotiate a common HMAC algorithm")]
    NoCommonHmac,

    /// No common compression algorithm found between both sides.
    #[error("Unable to negotiate a common compression algorithm")]
    NoCommonCompression,

    /// The algorithm name has no factory in the registry.
    #[error("Algorithm `{0}` is unknown to the registry")]
    UnknownAlgorithm(String),

    /// Protocol error in the key-exchange.
    #[error("Error in the key-exchange algorithm")]
    KexError,

    /// Error while encrypting or decrypting messages.
    #[error("The cipher ended up in an error")]
    Cipher,

    /// None of the registered verifiers accepted the server host key.
    #[error("The host key could not be verified")]
    HostKeyUnverified,

    /// A blocking wait expired.
    #[error("A blocking wait expired")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// The message received was unexpected in the current context.
    #[error("Peer sent a message that made no sense in the current context")]
    UnexpectedMessage,

    /// The session has been disconnected.
    #[error(transparent)]
    Disconnected(#[from] DisconnectedError),

    /// The transport already failed, the original cause is shared by every waiter.
    #[error("The transport has failed: {0}")]
    Faulted(Arc<Error>),
}

impl Error {
    /// The reason code advertised to the peer when this error tears the
    /// session down. `None` when no outbound disconnect is warranted.
    pub(crate) fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            Self::Io(_) | Self::Disconnected(_) | Self::Faulted(_) => None,

            Self::Integrity(_) => Some(DisconnectReason::MacError),
            Self::HostKeyUnverified => Some(DisconnectReason::HostKeyNotVerifiable),
            Self::Timeout(_) => Some(DisconnectReason::ByApplication),

            Self::NoCommonKex
            | Self::NoCommonKey
            | Self::NoCommonCipher
            | Self::NoCommonHmac
            | Self::NoCommonCompression
            | Self::UnknownAlgorithm(_)
            | Self::Signature(_)
            | Self::Key(_)
            | Self::KexError => Some(DisconnectReason::KeyExchangeFailed),

            _ => Some(DisconnectReason::ProtocolError),
        }
    }
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
