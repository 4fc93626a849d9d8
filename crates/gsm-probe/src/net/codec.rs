//! Byte-level decoding helpers shared by the binary strategies.

use std::collections::BTreeMap;

use bytes::Buf;

use crate::error::ProbeError;

/// A checked cursor over a received datagram.
///
/// Every read validates the remaining length first; underflow is a
/// [`ProbeError::Protocol`], never a panic.
pub struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        PacketReader { buf }
    }

    fn need(&self, n: usize, what: &str) -> Result<(), ProbeError> {
        if self.buf.remaining() < n {
            return Err(ProbeError::protocol(format!(
                "truncated packet reading {what}: need {n}, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn u8(&mut self, what: &str) -> Result<u8, ProbeError> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16_le(&mut self, what: &str) -> Result<u16, ProbeError> {
        self.need(2, what)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u16_be(&mut self, what: &str) -> Result<u16, ProbeError> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    pub fn u32_le(&mut self, what: &str) -> Result<u32, ProbeError> {
        self.need(4, what)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64_le(&mut self, what: &str) -> Result<u64, ProbeError> {
        self.need(8, what)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn i32_le(&mut self, what: &str) -> Result<i32, ProbeError> {
        self.need(4, what)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], ProbeError> {
        self.need(n, what)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Consume everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = self.buf;
        self.buf = &[];
        out
    }

    /// Null-terminated string, lossily decoded.
    pub fn cstring(&mut self, what: &str) -> Result<String, ProbeError> {
        let Some(end) = self.buf.iter().position(|&b| b == 0) else {
            return Err(ProbeError::protocol(format!(
                "unterminated string reading {what}"
            )));
        };
        let (head, tail) = self.buf.split_at(end);
        self.buf = &tail[1..];
        Ok(String::from_utf8_lossy(head).into_owned())
    }

    /// One-byte length-prefixed string.
    pub fn pascal_string(&mut self, what: &str) -> Result<String, ProbeError> {
        let len = self.u8(what)? as usize;
        let raw = self.take(len, what)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    /// Four-byte little-endian length-prefixed string.
    pub fn long_string(&mut self, what: &str) -> Result<String, ProbeError> {
        let len = self.u32_le(what)? as usize;
        let raw = self.take(len, what)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    pub fn expect(&mut self, magic: &[u8], what: &str) -> Result<(), ProbeError> {
        let got = self.take(magic.len(), what)?;
        if got != magic {
            return Err(ProbeError::protocol(format!(
                "bad {what}: expected {magic:02x?}, got {got:02x?}"
            )));
        }
        Ok(())
    }
}

/// Parse a quake-style infostring: `\key\value\key\value...`.
///
/// A leading backslash is optional; an odd trailing key maps to the empty
/// string, matching what servers actually send.
pub fn parse_infostring(raw: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut parts = raw.trim_start_matches('\\').split('\\');
    while let Some(key) = parts.next() {
        if key.is_empty() {
            continue;
        }
        let value = parts.next().unwrap_or_default();
        out.insert(key.to_owned(), value.to_owned());
    }
    out
}
