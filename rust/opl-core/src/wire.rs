//! Big-endian length-prefixed framing shared by every OPL binary format.

use crate::bytecode::DecodeError;

/// Append a big-endian `u32`.
pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Append `len:u32 BE | bytes`.
pub fn put_framed(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

/// Forward-only cursor over a byte slice. Every read is bounds-checked and
/// reports the offset at which the input ran out.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                what,
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32, DecodeError> {
        let raw = self.take(4, what)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Read `len:u32 BE | bytes`.
    pub fn framed(&mut self, what: &'static str) -> Result<&'a [u8], DecodeError> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framed_round_trip() {
        let mut out = Vec::new();
        put_framed(&mut out, b"abc");
        put_framed(&mut out, b"");
        let mut r = ByteReader::new(&out);
        assert_eq!(r.framed("a").unwrap(), b"abc");
        assert_eq!(r.framed("b").unwrap(), b"");
        assert!(r.is_empty());
    }

    #[test]
    fn short_read_reports_offset() {
        let mut r = ByteReader::new(&[0, 0, 0, 9, 1, 2]);
        let err = r.framed("arg").unwrap_err();
        let DecodeError::Truncated {
            offset,
            needed,
            available,
            ..
        } = err
        else {
            panic!("expected truncation, got {:?}", err);
        };
        assert_eq!(offset, 4);
        assert_eq!(needed, 9);
        assert_eq!(available, 2);
    }
}
