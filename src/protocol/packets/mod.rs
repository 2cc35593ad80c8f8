//! Packet definitions and wire primitives.
//!
//! Every field of the game protocol is built from a handful of primitives:
//! VarInts (LEB128-style, at most five bytes for an `i32`), length-prefixed
//! UTF-8 strings and big-endian fixed-width integers.

pub mod codec;
pub mod ids;

pub use codec::*;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::error::{ProtocolError, ProtocolResult};

/// Longest string the protocol allows, in UTF-16 code units.
pub const MAX_STRING_LENGTH: usize = 32767;

/// A decoded packet: id plus the bytes following it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet with the given id and payload.
    pub fn new(id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// Number of bytes `value` takes as a VarInt.
pub fn varint_len(value: i32) -> usize {
    let mut value = value as u32;
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

pub fn put_varint(buf: &mut BytesMut, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.put_u8(value as u8);
            return;
        }
        buf.put_u8((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
}

pub fn get_varint(buf: &mut impl Buf) -> ProtocolResult<i32> {
    let mut value: u32 = 0;
    for i in 0..5 {
        if !buf.has_remaining() {
            return Err(ProtocolError::PacketTooShort {
                needed: i + 1,
                got: i,
            });
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProtocolError::VarIntTooLong)
}

/// Decode a VarInt at the start of `src` without consuming it.
///
/// Returns the value and its encoded length, or `None` if `src` ends before
/// the VarInt does.
pub fn peek_varint(src: &[u8]) -> ProtocolResult<Option<(i32, usize)>> {
    let mut value: u32 = 0;
    for (i, byte) in src.iter().take(5).enumerate() {
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value as i32, i + 1)));
        }
    }
    if src.len() >= 5 {
        Err(ProtocolError::VarIntTooLong)
    } else {
        Ok(None)
    }
}

pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_varint(buf, value.len() as i32);
    buf.put_slice(value.as_bytes());
}

pub fn get_string(buf: &mut impl Buf) -> ProtocolResult<String> {
    let len = get_varint(buf)?;
    if len < 0 || len as usize > MAX_STRING_LENGTH * 4 {
        return Err(ProtocolError::InvalidString {
            message: format!("length {} out of range", len),
        });
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::PacketTooShort {
            needed: len,
            got: buf.remaining(),
        });
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| ProtocolError::InvalidString {
        message: e.to_string(),
    })
}

pub fn get_u8(buf: &mut impl Buf) -> ProtocolResult<u8> {
    if !buf.has_remaining() {
        return Err(ProtocolError::PacketTooShort { needed: 1, got: 0 });
    }
    Ok(buf.get_u8())
}

pub fn get_i64(buf: &mut impl Buf) -> ProtocolResult<i64> {
    if buf.remaining() < 8 {
        return Err(ProtocolError::PacketTooShort {
            needed: 8,
            got: buf.remaining(),
        });
    }
    Ok(buf.get_i64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_known_encodings() {
        let cases: &[(i32, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (25565, &[0xDD, 0xC7, 0x01]),
            (2147483647, &[0xFF, 0xFF, 0xFF, 0xFF, 0x07]),
            (-1, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];

        for (value, bytes) in cases {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, *value);
            assert_eq!(&buf[..], *bytes, "encoding {}", value);
            assert_eq!(varint_len(*value), bytes.len());

            let mut read = Bytes::copy_from_slice(bytes);
            assert_eq!(get_varint(&mut read).unwrap(), *value);
        }
    }

    #[test]
    fn test_varint_too_long() {
        let mut buf = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(get_varint(&mut buf), Err(ProtocolError::VarIntTooLong)));
        assert!(matches!(
            peek_varint(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
            Err(ProtocolError::VarIntTooLong)
        ));
    }

    #[test]
    fn test_peek_varint_incomplete() {
        assert_eq!(peek_varint(&[]).unwrap(), None);
        assert_eq!(peek_varint(&[0x80]).unwrap(), None);
        assert_eq!(peek_varint(&[0x80, 0x01, 0xAA]).unwrap(), Some((128, 2)));
    }

    #[test]
    fn test_string_round_trip_and_truncation() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "héllo");
        let mut read = buf.clone().freeze();
        assert_eq!(get_string(&mut read).unwrap(), "héllo");

        let mut short = buf.freeze().slice(..3);
        assert!(matches!(
            get_string(&mut short),
            Err(ProtocolError::PacketTooShort { .. })
        ));
    }
}
