//! Client session configuration.

use std::time::Duration;

use crate::algorithm::{Cipher, Compress, Hmac, Kex, Key};

/// A client transport configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Software name and version advertised in the identification line,
    /// after the `SSH-2.0-` prefix.
    pub software: String,

    /// Timeout for every blocking wait: state changes, kex completion,
    /// packet writes.
    pub timeout: Duration,

    /// Depth of the outbound packet queue drained by the writer.
    pub queue_depth: usize,

    /// The algorithms enabled for this session.
    pub algorithms: Algorithms,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            software: concat!(env!("CARGO_PKG_NAME"), "_", env!("CARGO_PKG_VERSION")).into(),
            timeout: Duration::from_secs(120),
            queue_depth: 32,
            algorithms: Default::default(),
        }
    }
}

/// Enabled algorithms, each list in preference order.
#[derive(Debug, Clone)]
pub struct Algorithms {
    /// Enabled algorithms for _key-exchange_.
    pub kexs: Vec<Kex>,

    /// Enabled algorithms for _server key signature_.
    pub keys: Vec<Key>,

    /// Enabled algorithms for _encryption & decryption_.
    pub ciphers: Vec<Cipher>,

    /// Enabled algorithms for _hmac_.
    pub macs: Vec<Hmac>,

    /// Enabled algorithms for _compression_.
    pub compressions: Vec<Compress>,
}

impl Default for Algorithms {
    fn default() -> Self {
        Self {
            kexs: vec![
                Kex::Curve25519Sha256,
                Kex::Curve25519Sha256Libssh,
                Kex::DiffieHellmanGroup14Sha256,
                Kex::DiffieHellmanGroup14Sha1,
                Kex::DiffieHellmanGroup1Sha1,
            ],
            keys: vec![
                Key::Ed25519,
                Key::Ecdsa {
                    curve: ssh_key::EcdsaCurve::NistP384,
                },
                Key::Ecdsa {
                    curve: ssh_key::EcdsaCurve::NistP256,
                },
                Key::Rsa {
                    hash: Some(ssh_key::HashAlg::Sha512),
                },
                Key::Rsa {
                    hash: Some(ssh_key::HashAlg::Sha256),
                },
                Key::Rsa { hash: None },
            ],
            ciphers: vec![
                Cipher::Aes256Ctr,
                Cipher::Aes192Ctr,
                Cipher::Aes128Ctr,
                Cipher::Aes256Cbc,
                Cipher::Aes192Cbc,
                Cipher::Aes128Cbc,
                Cipher::TDesCbc,
            ],
            macs: vec![
                Hmac::HmacSha512,
                Hmac::HmacSha256,
                Hmac::HmacSha1,
                Hmac::HmacMd5,
            ],
            compressions: vec![Compress::None, Compress::ZlibOpenssh, Compress::Zlib],
        }
    }
}
