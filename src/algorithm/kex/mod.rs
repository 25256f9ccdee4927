//! Key-exchange methods: each one runs as a little machine fed with the
//! peer's followup packets until it produces `K`, `H` and the host key.

use strum::{AsRefStr, EnumString};

use crate::{Buffer, Result};

mod curve25519;
pub(crate) mod group;

/// SSH key-exchange algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Kex {
    /// Curve25519 ECDH with sha-2-256 digest.
    Curve25519Sha256,

    /// Curve25519 ECDH with sha-2-256 digest (pre-RFC 8731).
    #[strum(serialize = "curve25519-sha256@libssh.org")]
    Curve25519Sha256Libssh,

    /// 2048-bit MODP group with sha-2-256 digest.
    DiffieHellmanGroup14Sha256,

    /// 2048-bit MODP group with sha-1 digest.
    DiffieHellmanGroup14Sha1,

    /// 1024-bit MODP group with sha-1 digest.
    DiffieHellmanGroup1Sha1,
}

impl Kex {
    /// The digest this method binds into the exchange hash and key
    /// derivation.
    pub(crate) fn hash(&self) -> KexHash {
        match self {
            Self::Curve25519Sha256
            | Self::Curve25519Sha256Libssh
            | Self::DiffieHellmanGroup14Sha256 => KexHash::Sha256,
            Self::DiffieHellmanGroup14Sha1 | Self::DiffieHellmanGroup1Sha1 => KexHash::Sha1,
        }
    }

    /// Begin the exchange, producing the machine and the first packet to
    /// send.
    pub(crate) fn start(&self) -> (RunningKex, Buffer) {
        match self {
            Self::Curve25519Sha256 | Self::Curve25519Sha256Libssh => {
                let (machine, init) = curve25519::Ecdh::new(self.hash());

                (RunningKex::Ecdh(machine), init)
            }
            Self::DiffieHellmanGroup14Sha256 | Self::DiffieHellmanGroup14Sha1 => {
                let (machine, init) = group::Dh::new(self.hash(), &group::GROUP14);

                (RunningKex::Dh(machine), init)
            }
            Self::DiffieHellmanGroup1Sha1 => {
                let (machine, init) = group::Dh::new(self.hash(), &group::GROUP1);

                (RunningKex::Dh(machine), init)
            }
        }
    }
}

/// The digest negotiated along the kex method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KexHash {
    Sha1,
    Sha256,
}

impl KexHash {
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        use digest::Digest;

        match self {
            Self::Sha1 => sha1::Sha1::digest(data).to_vec(),
            Self::Sha256 => sha2::Sha256::digest(data).to_vec(),
        }
    }
}

/// Identification lines and KEXINIT payloads bound into the exchange hash.
pub(crate) struct Exchange<'x> {
    pub v_c: &'x str,
    pub v_s: &'x str,
    pub i_c: &'x [u8],
    pub i_s: &'x [u8],
}

impl Exchange<'_> {
    /// Open the hash input with the `V_C ‖ V_S ‖ I_C ‖ I_S` prefix common
    /// to every method.
    fn prefix(&self) -> Buffer {
        let mut buffer = Buffer::new();
        buffer.put_string(self.v_c.as_bytes());
        buffer.put_string(self.v_s.as_bytes());
        buffer.put_string(self.i_c);
        buffer.put_string(self.i_s);

        buffer
    }
}

/// The product of a completed exchange.
pub(crate) struct KexOutput {
    /// The shared secret `K`, as an unsigned big-endian magnitude.
    pub secret: Vec<u8>,

    /// The exchange hash `H`.
    pub hash: Vec<u8>,

    /// The server host key, already checked against its signature over `H`.
    pub host_key: ssh_key::PublicKey,

    /// The digest that produced `H`.
    pub hash_alg: KexHash,
}

/// An exchange in flight.
pub(crate) enum RunningKex {
    Ecdh(curve25519::Ecdh),
    Dh(group::Dh),
}

impl RunningKex {
    /// Feed one followup packet, message byte included; `Some` once the
    /// exchange completed.
    pub(crate) fn next(
        &mut self,
        message: u8,
        payload: &mut Buffer,
        exchange: &Exchange<'_>,
    ) -> Result<Option<KexOutput>> {
        match self {
            Self::Ecdh(machine) => machine.next(message, payload, exchange),
            Self::Dh(machine) => machine.next(message, payload, exchange),
        }
    }
}
