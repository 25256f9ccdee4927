//! Primitives to manipulate binary data in the SSH wire format
//! described in [RFC 4251 § 5](https://datatracker.ietf.org/doc/html/rfc4251#section-5).

use std::fmt;

use crate::{Error, Result};

/// The accepted bound for a single `string` or `name-list`, to keep a
/// misbehaving peer from ballooning our allocations.
pub const MAX_STRING_SIZE: usize = 0x40000;

/// Bytes reserved at the front of an outgoing packet for the
/// `packet_length` and `padding_length` fields.
pub(crate) const HEADER_SIZE: usize = 5;

/// A growable byte buffer with independent read and write cursors,
/// reading and writing the SSH wire types.
///
/// Writes append at the end, reads consume from `rpos`; reading past the
/// written region fails with [`Error::Underflow`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    rpos: usize,
}

impl Buffer {
    /// Create an empty [`Buffer`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a [`Buffer`] opened with `message` as its first byte.
    pub fn with_message(message: u8) -> Self {
        Self {
            data: vec![message],
            rpos: 0,
        }
    }

    /// Create a [`Buffer`] with [`HEADER_SIZE`] bytes reserved, so the
    /// encoder can fill the packet header in place afterwards.
    pub(crate) fn with_header_space() -> Self {
        Self {
            data: vec![0; HEADER_SIZE],
            rpos: HEADER_SIZE,
        }
    }

    /// The read cursor.
    pub fn rpos(&self) -> usize {
        self.rpos
    }

    /// Move the read cursor, clamped to the written region.
    pub fn set_rpos(&mut self, rpos: usize) {
        self.rpos = rpos.min(self.data.len());
    }

    /// The write cursor, always at the end of the written region.
    pub fn wpos(&self) -> usize {
        self.data.len()
    }

    /// Move the write cursor, zero-filling when growing.
    pub fn set_wpos(&mut self, wpos: usize) {
        self.data.resize(wpos, 0);
        self.rpos = self.rpos.min(self.data.len());
    }

    /// Bytes left to read.
    pub fn available(&self) -> usize {
        self.data.len() - self.rpos
    }

    /// The unread region, `rpos..wpos`.
    pub fn compact(&self) -> &[u8] {
        &self.data[self.rpos..]
    }

    /// The whole written region.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Unwrap into the backing storage.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        if self.available() < len {
            return Err(Error::Underflow);
        }

        let slice = &self.data[self.rpos..self.rpos + len];
        self.rpos += len;

        Ok(slice)
    }

    /// Write a `byte`.
    pub fn put_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Read a `byte`.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Write a big-endian `uint32`.
    pub fn put_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    /// Read a big-endian `uint32`.
    pub fn get_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;

        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write a `boolean`.
    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    /// Read a `boolean`, any non-zero byte being `true`.
    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Write raw bytes, without a length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Read `len` raw bytes.
    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    /// Write a length-prefixed `string`.
    pub fn put_string(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.put_bytes(bytes);
    }

    /// Read a length-prefixed `string`, bounded by [`MAX_STRING_SIZE`].
    pub fn get_string(&mut self) -> Result<Vec<u8>> {
        self.get_string_bounded(MAX_STRING_SIZE)
    }

    /// Read a length-prefixed `string`, bounded by `max`.
    pub fn get_string_bounded(&mut self, max: usize) -> Result<Vec<u8>> {
        let len = self.get_u32()? as usize;

        if len > max {
            return Err(Error::Overflow(len));
        }

        self.get_bytes(len)
    }

    /// Write a `name-list`.
    pub fn put_name_list(&mut self, list: &NameList) {
        self.put_string(list.to_string().as_bytes());
    }

    /// Read a `name-list`.
    pub fn get_name_list(&mut self) -> Result<NameList> {
        let line = self.get_string()?;
        let line = std::str::from_utf8(&line)
            .map_err(|_| Error::Protocol("name-list is not valid US-ASCII"))?;

        Ok(line.parse().expect("name-list parsing is infallible"))
    }

    /// Write an `mpint` from an unsigned big-endian magnitude; minimal
    /// length, sign octet prepended when the high bit is set, zero as an
    /// empty body.
    pub fn put_mpint(&mut self, magnitude: &[u8]) {
        let magnitude = match magnitude.iter().position(|&byte| byte != 0) {
            Some(first) => &magnitude[first..],
            None => &[],
        };

        if magnitude.first().is_some_and(|&byte| byte & 0x80 != 0) {
            self.put_u32(magnitude.len() as u32 + 1);
            self.put_u8(0);
            self.put_bytes(magnitude);
        } else {
            self.put_string(magnitude);
        }
    }

    /// Read an `mpint` body, sign octet included when present.
    pub fn get_mpint(&mut self) -> Result<Vec<u8>> {
        self.get_string()
    }

    /// Overwrite a single already-written byte.
    pub(crate) fn poke_u8(&mut self, at: usize, value: u8) {
        self.data[at] = value;
    }

    /// Overwrite an already-written big-endian `uint32`.
    pub(crate) fn poke_u32(&mut self, at: usize, value: u32) {
        self.data[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data, rpos: 0 }
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        data.to_vec().into()
    }
}

/// A `name-list`: comma-joined ASCII names, ordered by preference.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NameList(Vec<String>);

impl NameList {
    /// The names, in preference order.
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Whether the list holds no name at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `name` appears anywhere in the list.
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|ours| ours == name)
    }

    /// Walk our preference order, picking the first name `other` also
    /// advertises.
    pub fn preferred_in<'s>(&'s self, other: &NameList) -> Option<&'s str> {
        self.0
            .iter()
            .map(String::as_str)
            .find(|name| other.contains(name))
    }
}

impl<T: AsRef<str>> FromIterator<T> for NameList {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(|name| name.as_ref().into()).collect())
    }
}

impl std::str::FromStr for NameList {
    type Err = std::convert::Infallible;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        Ok(line
            .split(',')
            .filter(|name| !name.is_empty())
            .collect())
    }
}

impl fmt::Display for NameList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}
