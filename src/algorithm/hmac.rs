use digest::OutputSizeUser;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use strum::{AsRefStr, EnumString};

/// SSH hmac algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Hmac {
    /// HMAC with sha-2-512 digest.
    #[strum(serialize = "hmac-sha2-512")]
    HmacSha512,

    /// HMAC with sha-2-256 digest.
    #[strum(serialize = "hmac-sha2-256")]
    HmacSha256,

    /// HMAC with sha-1 digest.
    HmacSha1,

    /// HMAC with md5 digest.
    HmacMd5,

    /// No HMAC algorithm.
    #[default]
    None,
}

fn sign<D: digest::Mac + digest::KeyInit>(seq: u32, buf: &[u8], key: &[u8]) -> Vec<u8> {
    <D as digest::Mac>::new_from_slice(key)
        .expect("HMAC accepts keys of any size")
        .chain_update(seq.to_be_bytes())
        .chain_update(buf)
        .finalize()
        .into_bytes()
        .to_vec()
}

fn verify<D: digest::Mac + digest::KeyInit>(
    seq: u32,
    buf: &[u8],
    key: &[u8],
    mac: &[u8],
) -> Result<(), digest::MacError> {
    <D as digest::Mac>::new_from_slice(key)
        .expect("HMAC accepts keys of any size")
        .chain_update(seq.to_be_bytes())
        .chain_update(buf)
        .verify_slice(mac)
}

impl Hmac {
    /// Authenticate `seq ‖ buf`, producing the trailing mac bytes.
    pub(crate) fn sign(&self, seq: u32, buf: &[u8], key: &[u8]) -> Vec<u8> {
        match self {
            Self::HmacSha512 => sign::<hmac::Hmac<Sha512>>(seq, buf, key),
            Self::HmacSha256 => sign::<hmac::Hmac<Sha256>>(seq, buf, key),
            Self::HmacSha1 => sign::<hmac::Hmac<Sha1>>(seq, buf, key),
            Self::HmacMd5 => sign::<hmac::Hmac<Md5>>(seq, buf, key),
            Self::None => Default::default(),
        }
    }

    /// Check the trailing mac bytes against `seq ‖ buf`, in constant time.
    pub(crate) fn verify(
        &self,
        seq: u32,
        buf: &[u8],
        key: &[u8],
        mac: &[u8],
    ) -> Result<(), digest::MacError> {
        match self {
            Self::HmacSha512 => verify::<hmac::Hmac<Sha512>>(seq, buf, key, mac),
            Self::HmacSha256 => verify::<hmac::Hmac<Sha256>>(seq, buf, key, mac),
            Self::HmacSha1 => verify::<hmac::Hmac<Sha1>>(seq, buf, key, mac),
            Self::HmacMd5 => verify::<hmac::Hmac<Md5>>(seq, buf, key, mac),
            Self::None => Ok(()),
        }
    }

    /// Output and key size, zero when no mac is installed.
    pub(crate) fn size(&self) -> usize {
        match self {
            Self::HmacSha512 => Sha512::output_size(),
            Self::HmacSha256 => Sha256::output_size(),
            Self::HmacSha1 => Sha1::output_size(),
            Self::HmacMd5 => Md5::output_size(),
            Self::None => 0,
        }
    }
}
