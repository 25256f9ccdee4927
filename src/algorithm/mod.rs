//! Supported algorithms for **compression**, **encryption**, **integrity**
//! and **key-exchange**, each doubling as its own name registry.

use std::str::FromStr;

use crate::{buffer::NameList, Error, Result};

mod cipher;
pub use cipher::Cipher;
pub(crate) use cipher::CipherState;

mod compress;
pub use compress::Compress;

mod hmac;
pub use hmac::Hmac;

pub(crate) mod kex;
pub use kex::Kex;

mod key;
pub use key::Key;

/// Instantiate the preferred algorithm for one negotiated slot: the first
/// name in `ours` that `theirs` also advertises, `missing` when the lists
/// share nothing.
pub(crate) fn negotiate<T: FromStr>(
    ours: &NameList,
    theirs: &NameList,
    missing: Error,
) -> Result<T> {
    let name = ours.preferred_in(theirs).ok_or(missing)?;

    name.parse()
        .map_err(|_| Error::UnknownAlgorithm(name.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_follows_our_preference() {
        let ours: NameList = ["aes256-ctr", "aes128-ctr"].into_iter().collect();
        let theirs: NameList = ["aes128-ctr", "aes256-ctr"].into_iter().collect();

        let cipher: Cipher = negotiate(&ours, &theirs, Error::NoCommonCipher).unwrap();
        assert_eq!(cipher, Cipher::Aes256Ctr);
    }

    #[test]
    fn negotiation_fails_without_a_common_name() {
        let ours: NameList = ["aes256-ctr"].into_iter().collect();
        let theirs: NameList = ["3des-cbc"].into_iter().collect();

        assert!(matches!(
            negotiate::<Cipher>(&ours, &theirs, Error::NoCommonCipher),
            Err(Error::NoCommonCipher)
        ));
    }

    #[test]
    fn unknown_names_fail_the_lookup() {
        let ours: NameList = ["vigenere"].into_iter().collect();
        let theirs = ours.clone();

        assert!(matches!(
            negotiate::<Cipher>(&ours, &theirs, Error::NoCommonCipher),
            Err(Error::UnknownAlgorithm(_))
        ));
    }
}
