//! Wire format serialization and deserialization.
//!
//! Uses cursor-based fixed-width encoding in network byte order.
//!
//! ## DataPacket Wire Format
//!
//! ```text
//! seq (4) || send_time_ms (4) || src_id (2)
//! ```
//!
//! All fields are big-endian with no padding, so both ends agree on the
//! layout regardless of host architecture. Receivers only require the first
//! [`DATA_PACKET_SIZE`] bytes; anything after them is ignored.

use alloc::vec::Vec;
use core::fmt;

use crate::types::NodeId;

/// Encoded size of a [`DataPacket`] in bytes.
pub const DATA_PACKET_SIZE: usize = 10;

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// Trailing bytes after a strictly decoded value.
    InvalidLength,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of buffer"),
            DecodeError::InvalidLength => write!(f, "trailing bytes after value"),
        }
    }
}

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Growable writer producing wire bytes.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32_be(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    /// Encode this value to the writer.
    fn encode(&self, w: &mut Writer);

    /// Encode and return the bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    /// Decode a value from the reader.
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(result)
    }
}

/// Application datagram originated by a sender and consumed by the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DataPacket {
    /// Per-sender sequence number, first packet carries 1.
    pub seq: u32,
    /// Sender clock at construction, see [`Timestamp::wire_millis`](crate::Timestamp::wire_millis).
    pub send_time_ms: u32,
    /// Identifier of the originating node.
    pub src_id: NodeId,
}

impl DataPacket {
    /// Encode into the fixed-width record.
    pub fn to_bytes(&self) -> [u8; DATA_PACKET_SIZE] {
        let mut w = Writer::with_capacity(DATA_PACKET_SIZE);
        self.encode(&mut w);
        let mut out = [0u8; DATA_PACKET_SIZE];
        out.copy_from_slice(w.as_slice());
        out
    }

    /// Decode the leading record of a received payload.
    ///
    /// Fails with [`DecodeError::UnexpectedEof`] when the payload is shorter
    /// than [`DATA_PACKET_SIZE`]. Trailing bytes are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(&mut Reader::new(data))
    }
}

impl Encode for DataPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_u32_be(self.seq);
        w.write_u32_be(self.send_time_ms);
        w.write_u16_be(self.src_id);
    }
}

impl Decode for DataPacket {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        // Length check up front so a short payload never yields a partial read.
        if r.remaining() < DATA_PACKET_SIZE {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(DataPacket {
            seq: r.read_u32_be()?,
            send_time_ms: r.read_u32_be()?,
            src_id: r.read_u16_be()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_data_packet_layout() {
        let packet = DataPacket {
            seq: 0x0102_0304,
            send_time_ms: 0xA0B0_C0D0,
            src_id: 0x0007,
        };
        assert_eq!(
            packet.to_bytes(),
            [0x01, 0x02, 0x03, 0x04, 0xA0, 0xB0, 0xC0, 0xD0, 0x00, 0x07]
        );
        assert_eq!(packet.encode_to_vec().len(), DATA_PACKET_SIZE);
    }

    #[test]
    fn test_data_packet_decode() {
        let bytes = [0, 0, 0, 42, 0, 0, 0x27, 0x10, 0, 3];
        let packet = DataPacket::from_bytes(&bytes).unwrap();
        assert_eq!(packet.seq, 42);
        assert_eq!(packet.send_time_ms, 10_000);
        assert_eq!(packet.src_id, 3);
    }

    #[test]
    fn test_short_payload_rejected() {
        for len in 0..DATA_PACKET_SIZE {
            let buf = vec![0xFFu8; len];
            assert_eq!(
                DataPacket::from_bytes(&buf),
                Err(DecodeError::UnexpectedEof),
                "len {len}"
            );
        }
    }

    #[test]
    fn test_trailing_bytes() {
        let packet = DataPacket {
            seq: 9,
            send_time_ms: 1,
            src_id: 2,
        };
        let mut buf = packet.encode_to_vec();
        buf.extend_from_slice(&[0xEE, 0xEE]);

        // Lenient on receive, strict through the Decode trait.
        assert_eq!(DataPacket::from_bytes(&buf), Ok(packet));
        assert_eq!(
            DataPacket::decode_from_slice(&buf),
            Err(DecodeError::InvalidLength)
        );
    }

    #[test]
    fn test_reader_bounds() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.read_u16_be(), Ok(0x0102));
        assert_eq!(r.read_u16_be(), Err(DecodeError::UnexpectedEof));
        assert_eq!(r.remaining(), 1);
    }
}
