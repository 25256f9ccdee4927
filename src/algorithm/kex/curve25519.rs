use signature::Verifier;
use ssh_key::Signature;

use super::{Exchange, KexHash, KexOutput};
use crate::{msg, Buffer, Error, Result};

/// A curve25519 ECDH run, from [RFC 8731](https://datatracker.ietf.org/doc/html/rfc8731).
pub(crate) struct Ecdh {
    hash: KexHash,
    secret: Option<x25519_dalek::EphemeralSecret>,
    q_c: x25519_dalek::PublicKey,
}

impl Ecdh {
    /// Generate the ephemeral pair and the `SSH_MSG_KEX_ECDH_INIT` payload.
    pub fn new(hash: KexHash) -> (Self, Buffer) {
        let secret = x25519_dalek::EphemeralSecret::random_from_rng(rand::thread_rng());
        let q_c = x25519_dalek::PublicKey::from(&secret);

        let mut init = Buffer::with_message(msg::KEXDH_INIT);
        init.put_string(q_c.as_bytes());

        (
            Self {
                hash,
                secret: Some(secret),
                q_c,
            },
            init,
        )
    }

    pub fn next(
        &mut self,
        message: u8,
        payload: &mut Buffer,
        exchange: &Exchange<'_>,
    ) -> Result<Option<KexOutput>> {
        if message != msg::KEXDH_REPLY {
            return Err(Error::Protocol("unexpected message during ECDH exchange"));
        }

        let k_s = payload.get_string()?;
        let q_s = payload.get_string()?;
        let signature = payload.get_string()?;

        let q_s = x25519_dalek::PublicKey::from(
            <[u8; 32]>::try_from(q_s.as_slice()).map_err(|_| Error::KexError)?,
        );
        let secret = self
            .secret
            .take()
            .ok_or(Error::Protocol("ECDH exchange already completed"))?
            .diffie_hellman(&q_s);

        let host_key = ssh_key::PublicKey::from_bytes(&k_s)?;

        let mut hashed = exchange.prefix();
        hashed.put_string(&k_s);
        hashed.put_string(self.q_c.as_bytes());
        hashed.put_string(q_s.as_bytes());
        hashed.put_mpint(secret.as_bytes());

        let hash = self.hash.digest(hashed.as_slice());

        Verifier::verify(&host_key, &hash, &Signature::try_from(signature.as_slice())?)?;

        Ok(Some(KexOutput {
            secret: secret.as_bytes().to_vec(),
            hash,
            host_key,
            hash_alg: self.hash,
        }))
    }
}
