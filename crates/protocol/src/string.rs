//! String descriptor decoding
//!
//! A string descriptor is a 2-byte header (`bLength`, `bDescriptorType`)
//! followed by `(bLength - 2) / 2` UTF-16LE code units. String descriptor 0 is
//! special and holds the supported language ids instead of text.

use crate::error::{DecodeError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Size of a buffer large enough for any string descriptor
pub const STRING_DESCRIPTOR_BUFFER_LEN: usize = 0x100;

const HEADER_LEN: usize = 2;

/// Borrowed view of a raw string descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringDescriptor<'a> {
    raw: &'a [u8],
}

impl<'a> StringDescriptor<'a> {
    pub fn new(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                kind: "string",
                needed: HEADER_LEN,
                available: raw.len(),
            });
        }
        Ok(Self { raw })
    }

    /// Declared length (bLength)
    pub fn declared_len(&self) -> usize {
        self.raw[0] as usize
    }

    pub fn descriptor_type(&self) -> u8 {
        self.raw[1]
    }

    /// UTF-16LE code units present in both the declared length and the buffer
    pub fn code_units(&self) -> impl Iterator<Item = u16> + 'a {
        let end = self.declared_len().min(self.raw.len());
        let body = if end > HEADER_LEN {
            &self.raw[HEADER_LEN..end]
        } else {
            &[]
        };
        body.chunks_exact(2).map(LittleEndian::read_u16)
    }

    /// Lossy ASCII decode into `out`
    ///
    /// Fails without touching `out` when it is shorter than the declared
    /// length. Otherwise the low byte of every code unit is copied into `out`
    /// (high bytes are dropped, so non-ASCII text comes out corrupted), the
    /// last slot written is overwritten with a 0 terminator, and the number of
    /// slots processed is returned.
    pub fn decode_into(&self, out: &mut [u8]) -> Result<usize> {
        if out.len() < self.declared_len() {
            return Err(DecodeError::BufferTooSmall {
                needed: self.declared_len(),
                available: out.len(),
            });
        }

        let mut count = 0;
        for (slot, unit) in out.iter_mut().zip(self.code_units()) {
            *slot = (unit & 0xff) as u8;
            count += 1;
        }

        if count > 0 {
            out[count - 1] = 0;
        }
        Ok(count)
    }

    /// Lossy ASCII decode, returning the text before the terminator
    pub fn decode_ascii(&self) -> Result<String> {
        let mut out = vec![0u8; self.declared_len().max(HEADER_LEN)];
        let count = self.decode_into(&mut out)?;
        let text = &out[..count.saturating_sub(1)];
        Ok(text.iter().map(|&b| b as char).collect())
    }

    /// Full UTF-16 decode; unpaired surrogates become U+FFFD
    pub fn decode_utf16(&self) -> String {
        char::decode_utf16(self.code_units())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    /// Language ids listed by string descriptor 0
    pub fn languages(&self) -> Vec<u16> {
        self.code_units().collect()
    }
}

/// Encode text as a string descriptor (type 0x03)
///
/// Text longer than a descriptor can hold is cut at 126 code units.
pub fn encode_string_descriptor(text: &str) -> Vec<u8> {
    let units: Vec<u16> = text.encode_utf16().take(126).collect();
    let mut buf = vec![0u8; HEADER_LEN + units.len() * 2];
    buf[0] = buf.len() as u8;
    buf[1] = 0x03;
    for (i, unit) in units.iter().enumerate() {
        LittleEndian::write_u16(&mut buf[HEADER_LEN + i * 2..], *unit);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_replaces_last_unit() {
        let raw = [0x0a, 0x03, b'A', 0, b'B', 0, b'C', 0, b'D', 0];
        let desc = StringDescriptor::new(&raw).unwrap();

        let mut out = [0xffu8; 16];
        let count = desc.decode_into(&mut out).unwrap();

        assert_eq!(count, 4);
        assert_eq!(&out[..4], b"ABC\0");
        assert_eq!(desc.decode_ascii().unwrap(), "ABC");
    }

    #[test]
    fn test_too_small_destination_is_untouched() {
        let raw = [0x0a, 0x03, b'A', 0, b'B', 0, b'C', 0, b'D', 0];
        let desc = StringDescriptor::new(&raw).unwrap();

        let mut out = [0xeeu8; 9];
        let err = desc.decode_into(&mut out).unwrap_err();

        assert_eq!(
            err,
            DecodeError::BufferTooSmall {
                needed: 10,
                available: 9
            }
        );
        assert!(out.iter().all(|&b| b == 0xee));
    }

    #[test]
    fn test_high_byte_is_dropped() {
        // U+00E9 survives, U+0416 loses its high byte.
        let raw = [0x08, 0x03, 0xe9, 0x00, 0x16, 0x04, b'x', 0];
        let desc = StringDescriptor::new(&raw).unwrap();
        assert_eq!(desc.decode_ascii().unwrap(), "\u{e9}\u{16}");
        assert_eq!(desc.decode_utf16(), "\u{e9}\u{416}x");
    }

    #[test]
    fn test_empty_string_descriptor() {
        let raw = [0x02, 0x03];
        let desc = StringDescriptor::new(&raw).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(desc.decode_into(&mut out).unwrap(), 0);
        assert_eq!(desc.decode_ascii().unwrap(), "");
    }

    #[test]
    fn test_declared_length_beyond_buffer() {
        // Claims 10 bytes, only 6 arrived.
        let raw = [0x0a, 0x03, b'h', 0, b'i', 0];
        let desc = StringDescriptor::new(&raw).unwrap();
        assert_eq!(desc.code_units().count(), 2);
        assert_eq!(desc.decode_ascii().unwrap(), "h");
    }

    #[test]
    fn test_languages() {
        let raw = [0x04, 0x03, 0x09, 0x04];
        let desc = StringDescriptor::new(&raw).unwrap();
        assert_eq!(desc.languages(), vec![0x0409]);
    }

    #[test]
    fn test_header_required() {
        assert!(StringDescriptor::new(&[0x02]).is_err());
    }

    #[test]
    fn test_encode() {
        let buf = encode_string_descriptor("Hi");
        assert_eq!(buf, vec![0x06, 0x03, b'H', 0, b'i', 0]);
    }
}
