//! Message numbers and disconnect reason codes assigned by
//! [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253#section-12).

use std::ops::RangeInclusive;

/// `SSH_MSG_DISCONNECT`.
pub const DISCONNECT: u8 = 1;

/// `SSH_MSG_IGNORE`.
pub const IGNORE: u8 = 2;

/// `SSH_MSG_UNIMPLEMENTED`.
pub const UNIMPLEMENTED: u8 = 3;

/// `SSH_MSG_DEBUG`.
pub const DEBUG: u8 = 4;

/// `SSH_MSG_SERVICE_REQUEST`.
pub const SERVICE_REQUEST: u8 = 5;

/// `SSH_MSG_SERVICE_ACCEPT`.
pub const SERVICE_ACCEPT: u8 = 6;

/// `SSH_MSG_KEXINIT`.
pub const KEXINIT: u8 = 20;

/// `SSH_MSG_NEWKEYS`.
pub const NEWKEYS: u8 = 21;

/// `SSH_MSG_KEXDH_INIT`, also `SSH_MSG_KEX_ECDH_INIT`.
pub const KEXDH_INIT: u8 = 30;

/// `SSH_MSG_KEXDH_REPLY`, also `SSH_MSG_KEX_ECDH_REPLY`.
pub const KEXDH_REPLY: u8 = 31;

/// Message numbers reserved for the followups of the chosen kex method.
pub const KEX_FOLLOWUP: RangeInclusive<u8> = 30..=49;

/// The `reason` for disconnect in the `SSH_MSG_DISCONNECT` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc4253#section-11.1>.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `SSH_DISCONNECT_HOST_NOT_ALLOWED_TO_CONNECT`.
    HostNotAllowedToConnect,

    /// `SSH_DISCONNECT_PROTOCOL_ERROR`.
    ProtocolError,

    /// `SSH_DISCONNECT_KEY_EXCHANGE_FAILED`.
    KeyExchangeFailed,

    /// `SSH_DISCONNECT_RESERVED`.
    Reserved,

    /// `SSH_DISCONNECT_MAC_ERROR`.
    MacError,

    /// `SSH_DISCONNECT_COMPRESSION_ERROR`.
    CompressionError,

    /// `SSH_DISCONNECT_SERVICE_NOT_AVAILABLE`.
    ServiceNotAvailable,

    /// `SSH_DISCONNECT_PROTOCOL_VERSION_NOT_SUPPORTED`.
    ProtocolVersionNotSupported,

    /// `SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE`.
    HostKeyNotVerifiable,

    /// `SSH_DISCONNECT_CONNECTION_LOST`.
    ConnectionLost,

    /// `SSH_DISCONNECT_BY_APPLICATION`.
    ByApplication,

    /// `SSH_DISCONNECT_TOO_MANY_CONNECTIONS`.
    TooManyConnections,

    /// `SSH_DISCONNECT_AUTH_CANCELLED_BY_USER`.
    AuthCancelledByUser,

    /// `SSH_DISCONNECT_NO_MORE_AUTH_METHODS_AVAILABLE`.
    NoMoreAuthMethodsAvailable,

    /// `SSH_DISCONNECT_ILLEGAL_USER_NAME`.
    IllegalUserName,

    /// Any other disconnect reason, may be non-standard.
    Other(u32),
}

impl DisconnectReason {
    /// The numeric code carried on the wire.
    pub fn code(&self) -> u32 {
        match self {
            Self::HostNotAllowedToConnect => 1,
            Self::ProtocolError => 2,
            Self::KeyExchangeFailed => 3,
            Self::Reserved => 4,
            Self::MacError => 5,
            Self::CompressionError => 6,
            Self::ServiceNotAvailable => 7,
            Self::ProtocolVersionNotSupported => 8,
            Self::HostKeyNotVerifiable => 9,
            Self::ConnectionLost => 10,
            Self::ByApplication => 11,
            Self::TooManyConnections => 12,
            Self::AuthCancelledByUser => 13,
            Self::NoMoreAuthMethodsAvailable => 14,
            Self::IllegalUserName => 15,
            Self::Other(code) => *code,
        }
    }
}

impl From<u32> for DisconnectReason {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::HostNotAllowedToConnect,
            2 => Self::ProtocolError,
            3 => Self::KeyExchangeFailed,
            4 => Self::Reserved,
            5 => Self::MacError,
            6 => Self::CompressionError,
            7 => Self::ServiceNotAvailable,
            8 => Self::ProtocolVersionNotSupported,
            9 => Self::HostKeyNotVerifiable,
            10 => Self::ConnectionLost,
            11 => Self::ByApplication,
            12 => Self::TooManyConnections,
            13 => Self::AuthCancelledByUser,
            14 => Self::NoMoreAuthMethodsAvailable,
            15 => Self::IllegalUserName,
            other => Self::Other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_match_the_rfc() {
        assert_eq!(DisconnectReason::ProtocolError.code(), 2);
        assert_eq!(DisconnectReason::KeyExchangeFailed.code(), 3);
        assert_eq!(DisconnectReason::MacError.code(), 5);
        assert_eq!(DisconnectReason::HostKeyNotVerifiable.code(), 9);
        assert_eq!(DisconnectReason::ByApplication.code(), 11);
    }

    #[test]
    fn reason_codes_round_trip() {
        for code in 1..=15 {
            assert_eq!(DisconnectReason::from(code).code(), code);
        }
        assert_eq!(DisconnectReason::from(0xFE00_0001).code(), 0xFE00_0001);
    }
}
