use num_bigint_dig::{BigUint, RandBigInt};
use signature::Verifier;
use ssh_key::Signature;

use super::{Exchange, KexHash, KexOutput};
use crate::{msg, Buffer, Error, Result};

/// A fixed finite-field group from [RFC 2409](https://datatracker.ietf.org/doc/html/rfc2409#section-6.2)
/// or [RFC 3526](https://datatracker.ietf.org/doc/html/rfc3526#section-3).
pub(crate) struct DhGroup {
    prime: &'static str,
    generator: u8,
}

/// The 1024-bit MODP group, Oakley group 2.
pub(crate) static GROUP1: DhGroup = DhGroup {
    prime: "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
            020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
            4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
            EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF",
    generator: 2,
};

/// The 2048-bit MODP group.
pub(crate) static GROUP14: DhGroup = DhGroup {
    prime: "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
            020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
            4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
            EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
            98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
            9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
            E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
            3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
    generator: 2,
};

impl DhGroup {
    pub(crate) fn prime(&self) -> BigUint {
        BigUint::parse_bytes(self.prime.as_bytes(), 16).expect("the modulus is well-known")
    }

    pub(crate) fn generator(&self) -> BigUint {
        BigUint::from(self.generator)
    }
}

/// A classic `diffie-hellman-group*` run, from
/// [RFC 4253 § 8](https://datatracker.ietf.org/doc/html/rfc4253#section-8).
pub(crate) struct Dh {
    hash: KexHash,
    prime: BigUint,
    x: BigUint,
    e: BigUint,
}

impl Dh {
    /// Pick the ephemeral exponent and the `SSH_MSG_KEXDH_INIT` payload.
    pub fn new(hash: KexHash, group: &'static DhGroup) -> (Self, Buffer) {
        let prime = group.prime();
        let generator = BigUint::from(group.generator);

        let one = BigUint::from(1u8);
        let x = rand::thread_rng().gen_biguint_range(&(&one + &one), &(&prime - &one));
        let e = generator.modpow(&x, &prime);

        let mut init = Buffer::with_message(msg::KEXDH_INIT);
        init.put_mpint(&e.to_bytes_be());

        (Self { hash, prime, x, e }, init)
    }

    pub fn next(
        &mut self,
        message: u8,
        payload: &mut Buffer,
        exchange: &Exchange<'_>,
    ) -> Result<Option<KexOutput>> {
        if message != msg::KEXDH_REPLY {
            return Err(Error::Protocol("unexpected message during DH exchange"));
        }

        let k_s = payload.get_string()?;
        let f = BigUint::from_bytes_be(&payload.get_mpint()?);
        let signature = payload.get_string()?;

        // Reject degenerate public values outside (1, p - 1)
        let one = BigUint::from(1u8);
        if f <= one || f >= &self.prime - &one {
            return Err(Error::KexError);
        }

        let secret = f.modpow(&self.x, &self.prime);
        let host_key = ssh_key::PublicKey::from_bytes(&k_s)?;

        let mut hashed = exchange.prefix();
        hashed.put_string(&k_s);
        hashed.put_mpint(&self.e.to_bytes_be());
        hashed.put_mpint(&f.to_bytes_be());
        hashed.put_mpint(&secret.to_bytes_be());

        let hash = self.hash.digest(hashed.as_slice());

        Verifier::verify(&host_key, &hash, &Signature::try_from(signature.as_slice())?)?;

        Ok(Some(KexOutput {
            secret: secret.to_bytes_be(),
            hash,
            host_key,
            hash_alg: self.hash,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree_on_the_shared_secret() {
        let prime = GROUP14.prime();
        let generator = BigUint::from(GROUP14.generator);

        let mut rng = rand::thread_rng();
        let x = rng.gen_biguint_range(&BigUint::from(2u8), &prime);
        let y = rng.gen_biguint_range(&BigUint::from(2u8), &prime);

        let e = generator.modpow(&x, &prime);
        let f = generator.modpow(&y, &prime);

        assert_eq!(f.modpow(&x, &prime), e.modpow(&y, &prime));
    }

    #[test]
    fn group_moduli_have_the_expected_width() {
        assert_eq!(GROUP1.prime().bits(), 1024);
        assert_eq!(GROUP14.prime().bits(), 2048);
    }
}
