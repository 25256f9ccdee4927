use digest::{Digest, FixedOutputReset};

use crate::{
    algorithm::{kex::KexHash, Cipher, Hmac},
    Buffer,
};

/// Key material derived for one direction, per
/// [RFC 4253 § 7.2](https://datatracker.ietf.org/doc/html/rfc4253#section-7.2).
#[derive(Debug, Default)]
pub(crate) struct Keys {
    /// Cipher _initialization vector_.
    pub iv: Vec<u8>,

    /// Cipher _key_.
    pub key: Vec<u8>,

    /// Hmac _key_.
    pub hmac: Vec<u8>,
}

impl Keys {
    /// Derive the client-to-server material, letters `A`, `C` and `E`.
    pub fn client_to_server(
        hash: KexHash,
        secret: &[u8],
        exchange_hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        hmac: &Hmac,
    ) -> Self {
        Self {
            iv: derive(hash, secret, exchange_hash, b'A', session_id, cipher.iv_size()),
            key: derive(hash, secret, exchange_hash, b'C', session_id, cipher.key_size()),
            hmac: derive(hash, secret, exchange_hash, b'E', session_id, hmac.size()),
        }
    }

    /// Derive the server-to-client material, letters `B`, `D` and `F`.
    pub fn server_to_client(
        hash: KexHash,
        secret: &[u8],
        exchange_hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        hmac: &Hmac,
    ) -> Self {
        Self {
            iv: derive(hash, secret, exchange_hash, b'B', session_id, cipher.iv_size()),
            key: derive(hash, secret, exchange_hash, b'D', session_id, cipher.key_size()),
            hmac: derive(hash, secret, exchange_hash, b'F', session_id, hmac.size()),
        }
    }
}

fn derive(
    hash: KexHash,
    secret: &[u8],
    exchange_hash: &[u8],
    kind: u8,
    session_id: &[u8],
    size: usize,
) -> Vec<u8> {
    match hash {
        KexHash::Sha1 => derive_with::<sha1::Sha1>(secret, exchange_hash, kind, session_id, size),
        KexHash::Sha256 => {
            derive_with::<sha2::Sha256>(secret, exchange_hash, kind, session_id, size)
        }
    }
}

/// `K₁ = H(K ‖ H ‖ letter ‖ session_id)`, extended with
/// `Kₙ₊₁ = H(K ‖ H ‖ K₁ ‖ … ‖ Kₙ)` until `size` bytes are available.
fn derive_with<D: Digest + FixedOutputReset>(
    secret: &[u8],
    exchange_hash: &[u8],
    kind: u8,
    session_id: &[u8],
    size: usize,
) -> Vec<u8> {
    // K is hashed in its mpint encoding
    let mut k = Buffer::new();
    k.put_mpint(secret);

    let mut key = Vec::with_capacity(size);

    let mut hasher = D::new()
        .chain_update(k.as_slice())
        .chain_update(exchange_hash)
        .chain_update([kind])
        .chain_update(session_id);
    key.extend_from_slice(&hasher.finalize_reset());

    while key.len() < size {
        hasher = hasher
            .chain_update(k.as_slice())
            .chain_update(exchange_hash)
            .chain_update(&key);

        key.extend_from_slice(&hasher.finalize_reset());
    }

    key.truncate(size);
    key
}
