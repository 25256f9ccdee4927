use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use strum::{AsRefStr, EnumString};

use crate::{Error, Result};

/// Live cipher state, installed on a direction together with its key and IV.
pub(crate) type CipherState = Box<dyn std::any::Any + Send + Sync>;

/// SSH cipher algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Cipher {
    /// AES-256 in counter (CTR) mode.
    Aes256Ctr,

    /// AES-192 in counter (CTR) mode.
    Aes192Ctr,

    /// AES-128 in counter (CTR) mode.
    Aes128Ctr,

    /// AES-256 in cipher block chaining (CBC) mode.
    Aes256Cbc,

    /// AES-192 in cipher block chaining (CBC) mode.
    Aes192Cbc,

    /// AES-128 in cipher block chaining (CBC) mode.
    Aes128Cbc,

    /// TripleDES in cipher block chaining (CBC) mode.
    #[strum(serialize = "3des-cbc")]
    TDesCbc,

    /// No cipher algorithm.
    #[default]
    None,
}

fn init<C: KeyIvInit + Send + Sync + 'static>(key: &[u8], iv: &[u8]) -> Result<Option<CipherState>> {
    Ok(Some(Box::new(
        C::new_from_slices(key, iv).map_err(|_| Error::Cipher)?,
    )))
}

fn get<'s, C: 'static>(state: &'s mut Option<CipherState>) -> Result<&'s mut C> {
    state
        .as_mut()
        .and_then(|state| state.downcast_mut())
        .ok_or(Error::Cipher)
}

fn ctr<C: StreamCipher + 'static>(
    state: &mut Option<CipherState>,
    buffer: &mut [u8],
) -> Result<()> {
    get::<C>(state)?
        .try_apply_keystream(buffer)
        .map_err(|_| Error::Cipher)
}

fn cbc_encrypt<C: BlockEncryptMut + 'static>(
    state: &mut Option<CipherState>,
    buffer: &mut [u8],
) -> Result<()> {
    let (blocks, tail) = cipher::inout::InOutBuf::from(buffer).into_chunks();
    if !tail.is_empty() {
        return Err(Error::Cipher);
    }

    get::<C>(state)?.encrypt_blocks_inout_mut(blocks);

    Ok(())
}

fn cbc_decrypt<C: BlockDecryptMut + 'static>(
    state: &mut Option<CipherState>,
    buffer: &mut [u8],
) -> Result<()> {
    let (blocks, tail) = cipher::inout::InOutBuf::from(buffer).into_chunks();
    if !tail.is_empty() {
        return Err(Error::Cipher);
    }

    get::<C>(state)?.decrypt_blocks_inout_mut(blocks);

    Ok(())
}

impl Cipher {
    /// Build the outbound cipher state from derived key material.
    pub(crate) fn encryptor(&self, key: &[u8], iv: &[u8]) -> Result<Option<CipherState>> {
        match self {
            Self::Aes256Ctr => init::<ctr::Ctr128BE<aes::Aes256>>(key, iv),
            Self::Aes192Ctr => init::<ctr::Ctr128BE<aes::Aes192>>(key, iv),
            Self::Aes128Ctr => init::<ctr::Ctr128BE<aes::Aes128>>(key, iv),
            Self::Aes256Cbc => init::<cbc::Encryptor<aes::Aes256>>(key, iv),
            Self::Aes192Cbc => init::<cbc::Encryptor<aes::Aes192>>(key, iv),
            Self::Aes128Cbc => init::<cbc::Encryptor<aes::Aes128>>(key, iv),
            Self::TDesCbc => init::<cbc::Encryptor<des::TdesEde3>>(key, iv),
            Self::None => Ok(None),
        }
    }

    /// Build the inbound cipher state from derived key material.
    pub(crate) fn decryptor(&self, key: &[u8], iv: &[u8]) -> Result<Option<CipherState>> {
        match self {
            // In CTR mode, encryption and decryption are the same keystream
            Self::Aes256Ctr | Self::Aes192Ctr | Self::Aes128Ctr => self.encryptor(key, iv),
            Self::Aes256Cbc => init::<cbc::Decryptor<aes::Aes256>>(key, iv),
            Self::Aes192Cbc => init::<cbc::Decryptor<aes::Aes192>>(key, iv),
            Self::Aes128Cbc => init::<cbc::Decryptor<aes::Aes128>>(key, iv),
            Self::TDesCbc => init::<cbc::Decryptor<des::TdesEde3>>(key, iv),
            Self::None => Ok(None),
        }
    }

    pub(crate) fn encrypt(&self, state: &mut Option<CipherState>, buffer: &mut [u8]) -> Result<()> {
        match self {
            Self::Aes256Ctr => ctr::<ctr::Ctr128BE<aes::Aes256>>(state, buffer),
            Self::Aes192Ctr => ctr::<ctr::Ctr128BE<aes::Aes192>>(state, buffer),
            Self::Aes128Ctr => ctr::<ctr::Ctr128BE<aes::Aes128>>(state, buffer),
            Self::Aes256Cbc => cbc_encrypt::<cbc::Encryptor<aes::Aes256>>(state, buffer),
            Self::Aes192Cbc => cbc_encrypt::<cbc::Encryptor<aes::Aes192>>(state, buffer),
            Self::Aes128Cbc => cbc_encrypt::<cbc::Encryptor<aes::Aes128>>(state, buffer),
            Self::TDesCbc => cbc_encrypt::<cbc::Encryptor<des::TdesEde3>>(state, buffer),
            Self::None => Ok(()),
        }
    }

    pub(crate) fn decrypt(&self, state: &mut Option<CipherState>, buffer: &mut [u8]) -> Result<()> {
        match self {
            Self::Aes256Ctr | Self::Aes192Ctr | Self::Aes128Ctr => self.encrypt(state, buffer),
            Self::Aes256Cbc => cbc_decrypt::<cbc::Decryptor<aes::Aes256>>(state, buffer),
            Self::Aes192Cbc => cbc_decrypt::<cbc::Decryptor<aes::Aes192>>(state, buffer),
            Self::Aes128Cbc => cbc_decrypt::<cbc::Decryptor<aes::Aes128>>(state, buffer),
            Self::TDesCbc => cbc_decrypt::<cbc::Decryptor<des::TdesEde3>>(state, buffer),
            Self::None => Ok(()),
        }
    }

    pub(crate) fn block_size(&self) -> usize {
        match self {
            Self::None | Self::TDesCbc => 8,
            Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr => 16,
        }
    }

    pub(crate) fn key_size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Aes128Cbc | Self::Aes128Ctr => 16,
            Self::TDesCbc | Self::Aes192Cbc | Self::Aes192Ctr => 24,
            Self::Aes256Cbc | Self::Aes256Ctr => 32,
        }
    }

    pub(crate) fn iv_size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::TDesCbc => 8,
            Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr => 16,
        }
    }
}
