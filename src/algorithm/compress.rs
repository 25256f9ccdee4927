use std::io::{Read, Write};

use strum::{AsRefStr, EnumString};

use crate::{Result, PACKET_MAX_SIZE};

/// SSH compression algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Compress {
    /// zlib compression, deferred until user authentication completes.
    #[strum(serialize = "zlib@openssh.com")]
    ZlibOpenssh,

    /// zlib compression.
    Zlib,

    /// No compression algorithm.
    #[default]
    None,
}

impl Compress {
    /// Whether the algorithm stays dormant until user authentication
    /// completes.
    pub(crate) fn is_delayed(&self) -> bool {
        matches!(self, Self::ZlibOpenssh)
    }

    pub(crate) fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub(crate) fn compress(&self, buf: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::ZlibOpenssh | Self::Zlib => {
                let mut encoder = libflate::zlib::Encoder::new(Vec::with_capacity(buf.len()))?;

                encoder.write_all(buf)?;

                Ok(encoder.finish().into_result()?)
            }
            Self::None => Ok(buf.into()),
        }
    }

    pub(crate) fn decompress(&self, buf: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Self::ZlibOpenssh | Self::Zlib => {
                let mut buffer = Vec::with_capacity(buf.len());
                let decoder = libflate::zlib::Decoder::new(std::io::Cursor::new(buf))?;

                decoder
                    .take(PACKET_MAX_SIZE as u64)
                    .read_to_end(&mut buffer)?;

                Ok(buffer)
            }
            Self::None => Ok(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_round_trips() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(16);

        let compressed = Compress::Zlib.compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());

        let restored = Compress::Zlib.decompress(compressed).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn only_the_openssh_mode_is_delayed() {
        assert!(Compress::ZlibOpenssh.is_delayed());
        assert!(!Compress::Zlib.is_delayed());
        assert!(!Compress::None.is_delayed());
    }
}
