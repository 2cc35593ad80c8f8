//! Game server frame codec.
//!
//! Frames are `VarInt length | body`. Once the server enables compression the
//! body becomes `VarInt data length | payload`. A data length of zero marks an
//! uncompressed payload; anything else is the inflated size of a zlib stream.

use std::io::{Read, Write};

use bytes::{Buf, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tokio_util::codec::{Decoder, Encoder};

use crate::common::error::ProtocolError;
use crate::protocol::packets::{get_varint, peek_varint, put_varint, varint_len, Packet};

/// Largest frame accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Codec for game server packets.
#[derive(Debug, Default)]
pub struct GamePacketCodec {
    compression_threshold: Option<usize>,
}

impl GamePacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a Set Compression threshold. Negative values disable compression.
    pub fn set_compression_threshold(&mut self, threshold: i32) {
        self.compression_threshold = usize::try_from(threshold).ok();
    }
}

fn inflate(compressed: &[u8], declared: usize) -> Result<Bytes, ProtocolError> {
    if declared > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: declared,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut data = Vec::with_capacity(declared);
    // One byte past the declared size is enough to detect a lying header.
    ZlibDecoder::new(compressed)
        .take(declared as u64 + 1)
        .read_to_end(&mut data)?;
    if data.len() != declared {
        return Err(ProtocolError::DataLengthMismatch {
            declared,
            actual: data.len(),
        });
    }
    Ok(Bytes::from(data))
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

impl Decoder for GamePacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((length, prefix)) = peek_varint(src)? else {
            return Ok(None);
        };
        // Negative lengths wrap to huge values and fail the size check.
        let length = length as u32 as usize;
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }
        if src.len() < prefix + length {
            src.reserve(prefix + length - src.len());
            return Ok(None);
        }

        src.advance(prefix);
        let mut body = src.split_to(length).freeze();

        if self.compression_threshold.is_some() {
            let data_length = get_varint(&mut body)?;
            if data_length != 0 {
                body = inflate(&body, data_length as u32 as usize)?;
            }
        }

        let id = get_varint(&mut body)?;
        Ok(Some(Packet { id, payload: body }))
    }
}

impl Encoder<Packet> for GamePacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data_length = varint_len(item.id) + item.payload.len();
        if data_length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: data_length,
                max: MAX_FRAME_SIZE,
            });
        }

        match self.compression_threshold {
            None => {
                dst.reserve(varint_len(data_length as i32) + data_length);
                put_varint(dst, data_length as i32);
                put_varint(dst, item.id);
                dst.extend_from_slice(&item.payload);
            }
            Some(threshold) if data_length < threshold => {
                let frame_length = 1 + data_length;
                dst.reserve(varint_len(frame_length as i32) + frame_length);
                put_varint(dst, frame_length as i32);
                put_varint(dst, 0);
                put_varint(dst, item.id);
                dst.extend_from_slice(&item.payload);
            }
            Some(_) => {
                let mut data = BytesMut::with_capacity(data_length);
                put_varint(&mut data, item.id);
                data.extend_from_slice(&item.payload);
                let compressed = deflate(&data)?;

                let frame_length = varint_len(data_length as i32) + compressed.len();
                dst.reserve(varint_len(frame_length as i32) + frame_length);
                put_varint(dst, frame_length as i32);
                put_varint(dst, data_length as i32);
                dst.extend_from_slice(&compressed);
            }
        }
        Ok(())
    }
}
