use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use rand::RngCore;

use super::keys::Keys;
use crate::{
    algorithm::{Cipher, CipherState, Compress, Hmac},
    buffer::HEADER_SIZE,
    msg, Buffer, Error, Result, PACKET_MAX_SIZE,
};

/// Packets align to eight bytes even when no cipher is installed.
const MIN_BLOCK_SIZE: usize = 8;

/// The smallest legal `packet_length`.
const MIN_PACKET_LENGTH: usize = 5;

/// One direction of the session: cipher, integrity and compression state
/// plus the monotonic packet sequence number.
///
/// [`Pipeline::install`] swaps every algorithm at once but never touches
/// the sequence number, which spans the whole connection.
struct Pipeline {
    cipher: Cipher,
    state: Option<CipherState>,
    hmac: Hmac,
    compress: Compress,
    keys: Keys,
    authed: Arc<AtomicBool>,
    seq: u32,

    /// Bytes through this direction since the last key install.
    processed: usize,
}

impl Pipeline {
    fn new(authed: Arc<AtomicBool>) -> Self {
        Self {
            cipher: Cipher::None,
            state: None,
            hmac: Hmac::None,
            compress: Compress::None,
            keys: Keys::default(),
            authed,
            seq: 0,
            processed: 0,
        }
    }

    fn block_size(&self) -> usize {
        self.cipher.block_size().max(MIN_BLOCK_SIZE)
    }

    /// Delayed compression stays dormant until user authentication.
    fn compressible(&self) -> bool {
        !self.compress.is_none() && (!self.compress.is_delayed() || self.authed.load(Ordering::Relaxed))
    }

    fn install(
        &mut self,
        cipher: Cipher,
        state: Option<CipherState>,
        hmac: Hmac,
        compress: Compress,
        keys: Keys,
    ) {
        self.cipher = cipher;
        self.state = state;
        self.hmac = hmac;
        self.compress = compress;
        self.keys = keys;
        self.processed = 0;
    }
}

/// The outbound half of the codec, guarded by the transport's write lock.
pub(crate) struct Encoder {
    pipeline: Pipeline,
}

impl Encoder {
    pub fn new(authed: Arc<AtomicBool>) -> Self {
        Self {
            pipeline: Pipeline::new(authed),
        }
    }

    /// Switch the outbound direction to freshly negotiated algorithms.
    pub fn install(
        &mut self,
        cipher: Cipher,
        hmac: Hmac,
        compress: Compress,
        keys: Keys,
    ) -> Result<()> {
        let state = cipher.encryptor(&keys.key, &keys.iv)?;
        self.pipeline.install(cipher, state, hmac, compress, keys);

        Ok(())
    }

    /// Bytes encoded since the last [`Encoder::install`].
    pub fn since_install(&self) -> usize {
        self.pipeline.processed
    }

    /// Frame, authenticate and encrypt one payload, yielding the sequence
    /// number used and the wire bytes.
    pub fn encode(&mut self, payload: &[u8]) -> Result<(u32, Vec<u8>)> {
        let payload = if self.pipeline.compressible() {
            self.pipeline.compress.compress(payload)?
        } else {
            payload.to_vec()
        };

        if payload.len() > PACKET_MAX_SIZE {
            return Err(Error::Overflow(payload.len()));
        }

        let block = self.pipeline.block_size();
        let mut padding = (block - (payload.len() + HEADER_SIZE) % block) % block;
        // The source over-pads here: anything short of a full block gets one more
        if padding < block {
            padding += block;
        }

        let packet_length = payload.len() + padding + 1;

        let mut packet = Buffer::with_header_space();
        packet.put_bytes(&payload);

        let mut random = vec![0u8; padding];
        rand::thread_rng().fill_bytes(&mut random);
        packet.put_bytes(&random);

        packet.poke_u32(0, packet_length as u32);
        packet.poke_u8(4, padding as u8);

        let seq = self.pipeline.seq;
        self.pipeline.seq = seq.wrapping_add(1);

        let mut bytes = packet.into_vec();
        let mac = self
            .pipeline
            .hmac
            .sign(seq, &bytes, &self.pipeline.keys.hmac);

        self.pipeline
            .cipher
            .encrypt(&mut self.pipeline.state, &mut bytes)?;
        bytes.extend_from_slice(&mac);

        self.pipeline.processed = self.pipeline.processed.saturating_add(bytes.len());

        Ok((seq, bytes))
    }
}

enum DecodeState {
    /// Waiting for the first cipher block, which holds `packet_length`.
    AwaitHeader,

    /// Waiting for the rest of the packet and its mac.
    AwaitRest { packet_length: usize },
}

/// The inbound half of the codec, fed by the single reader.
pub(crate) struct Decoder {
    pipeline: Pipeline,
    state: DecodeState,
    buffer: Vec<u8>,
}

impl Decoder {
    pub fn new(authed: Arc<AtomicBool>) -> Self {
        Self {
            pipeline: Pipeline::new(authed),
            state: DecodeState::AwaitHeader,
            buffer: Vec::new(),
        }
    }

    /// Switch the inbound direction to freshly negotiated algorithms.
    pub fn install(
        &mut self,
        cipher: Cipher,
        hmac: Hmac,
        compress: Compress,
        keys: Keys,
    ) -> Result<()> {
        let state = cipher.decryptor(&keys.key, &keys.iv)?;
        self.pipeline.install(cipher, state, hmac, compress, keys);

        Ok(())
    }

    /// Bytes decoded since the last [`Decoder::install`].
    pub fn since_install(&self) -> usize {
        self.pipeline.processed
    }

    /// Consume raw wire bytes; every completed payload is appended to
    /// `out` along with the sequence number it carried.
    ///
    /// Returns how much of `input` was consumed: decoding stops right
    /// after a NEWKEYS payload, since whatever follows is framed under
    /// algorithms that are not installed yet.
    pub fn feed(&mut self, mut input: &[u8], out: &mut Vec<(u32, Buffer)>) -> Result<usize> {
        let offered = input.len();

        loop {
            match self.state {
                DecodeState::AwaitHeader => {
                    let block = self.pipeline.block_size();

                    let take = (block - self.buffer.len()).min(input.len());
                    self.buffer.extend_from_slice(&input[..take]);
                    input = &input[take..];

                    if self.buffer.len() < block {
                        return Ok(offered);
                    }

                    self.pipeline
                        .cipher
                        .decrypt(&mut self.pipeline.state, &mut self.buffer[..block])?;

                    let packet_length = u32::from_be_bytes(
                        self.buffer[..4].try_into().expect("block holds four bytes"),
                    ) as usize;

                    if !(MIN_PACKET_LENGTH..=PACKET_MAX_SIZE).contains(&packet_length)
                        || (packet_length + 4) % block != 0
                    {
                        return Err(Error::Protocol("illegal packet length"));
                    }

                    self.state = DecodeState::AwaitRest { packet_length };
                }
                DecodeState::AwaitRest { packet_length } => {
                    let block = self.pipeline.block_size();
                    let total = 4 + packet_length + self.pipeline.hmac.size();

                    let take = (total - self.buffer.len()).min(input.len());
                    self.buffer.extend_from_slice(&input[..take]);
                    input = &input[take..];

                    if self.buffer.len() < total {
                        return Ok(offered);
                    }

                    self.pipeline.cipher.decrypt(
                        &mut self.pipeline.state,
                        &mut self.buffer[block..4 + packet_length],
                    )?;

                    let seq = self.pipeline.seq;
                    self.pipeline.hmac.verify(
                        seq,
                        &self.buffer[..4 + packet_length],
                        &self.pipeline.keys.hmac,
                        &self.buffer[4 + packet_length..],
                    )?;

                    let padding_length = self.buffer[4] as usize;
                    if padding_length < 4 || padding_length + 1 > packet_length {
                        return Err(Error::Protocol("illegal padding length"));
                    }

                    let payload = self.buffer[HEADER_SIZE..4 + packet_length - padding_length].to_vec();
                    let payload = if self.pipeline.compressible() {
                        self.pipeline.compress.decompress(payload)?
                    } else {
                        payload
                    };

                    self.pipeline.seq = seq.wrapping_add(1);
                    self.pipeline.processed = self.pipeline.processed.saturating_add(total);
                    self.buffer.clear();
                    self.state = DecodeState::AwaitHeader;

                    let switching = payload.first() == Some(&msg::NEWKEYS);
                    out.push((seq, payload.into()));

                    if switching {
                        return Ok(offered - input.len());
                    }
                }
            }
        }
    }
}
