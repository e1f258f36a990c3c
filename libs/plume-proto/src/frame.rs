//! Binary frame with a fixed header, shared by the client protocol and the
//! gateway RPC transport.
//!
//! Frame layout (all integers big-endian):
//! ```text
//! +---------+---------+-----------+------------------+
//! | ver     | op      | body len  | body             |
//! | (2 B)   | (4 B)   | (4 B)     | (variable)       |
//! +---------+---------+-----------+------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ops::OP_RAW;
use crate::{Error, Result};

/// Current protocol version.
pub const VERSION: u16 = 1;

/// Header size: 2 bytes version + 4 bytes op + 4 bytes body length.
pub const HEADER_LEN: usize = 10;

/// Maximum frame body size (4 MiB).
pub const MAX_BODY_LEN: usize = 4 * 1024 * 1024;

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ver: u16,
    pub op: i32,
    pub body: Bytes,
}

impl Frame {
    /// Create a frame with the current protocol version.
    pub fn new(op: i32, body: impl Into<Bytes>) -> Self {
        Self {
            ver: VERSION,
            op,
            body: body.into(),
        }
    }

    /// Total encoded size of this frame.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }

    /// Encode this frame into a buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u16(self.ver);
        buf.put_i32(self.op);
        buf.put_u32(self.body.len() as u32);
        buf.put_slice(&self.body);
    }

    /// Encode this frame into a fresh `Bytes`.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Re-wrap this frame as the body of an outer raw frame, so intermediaries
    /// can forward it without re-deriving semantics. The inner operation code
    /// survives inside the body for the final consumer.
    pub fn into_raw(self) -> Frame {
        let body = self.encode_to_bytes();
        Frame::new(OP_RAW, body)
    }

    /// Try to decode one frame from a streaming buffer.
    ///
    /// Returns `Ok(None)` when more data is needed; consumes the frame's bytes
    /// from `buf` on success.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek at the header without consuming.
        let body_len =
            u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
        if body_len > MAX_BODY_LEN {
            return Err(Error::BodyTooLarge(body_len));
        }
        if buf.len() < HEADER_LEN + body_len {
            return Ok(None);
        }

        let ver = buf.get_u16();
        let op = buf.get_i32();
        buf.advance(4); // body length, already read
        let body = buf.split_to(body_len).freeze();

        Ok(Some(Frame { ver, op, body }))
    }

    /// Decode a frame from a complete buffer. Errors if the buffer is short.
    pub fn decode_exact(data: &[u8]) -> Result<Frame> {
        let mut buf = BytesMut::from(data);
        Frame::decode(&mut buf)?.ok_or(Error::Incomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let frame = Frame::new(5, &b"hello"[..]);
        let encoded = frame.encode_to_bytes();
        let decoded = Frame::decode_exact(&encoded).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.ver, VERSION);
        assert_eq!(decoded.op, 5);
        assert_eq!(&decoded.body[..], b"hello");
    }

    #[test]
    fn round_trip_empty_body() {
        let frame = Frame::new(42, Bytes::new());
        let decoded = Frame::decode_exact(&frame.encode_to_bytes()).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn round_trip_negative_op() {
        let frame = Frame::new(-7, &b"x"[..]);
        let decoded = Frame::decode_exact(&frame.encode_to_bytes()).unwrap();
        assert_eq!(decoded.op, -7);
    }

    #[test]
    fn header_layout_is_stable() {
        let frame = Frame::new(5, &b"hello"[..]);
        let encoded = frame.encode_to_bytes();
        assert_eq!(
            &encoded[..],
            &[
                0x00, 0x01, // ver = 1
                0x00, 0x00, 0x00, 0x05, // op = 5
                0x00, 0x00, 0x00, 0x05, // body len = 5
                b'h', b'e', b'l', b'l', b'o',
            ]
        );
    }

    #[test]
    fn raw_wrap_preserves_inner_frame() {
        let inner = Frame::new(5, &b"hello"[..]);
        let outer = inner.clone().into_raw();
        assert_eq!(outer.op, OP_RAW);

        let recovered = Frame::decode_exact(&outer.body).unwrap();
        assert_eq!(recovered, inner);
    }

    #[test]
    fn streaming_decode_across_partial_feeds() {
        let first = Frame::new(1, vec![1u8, 2, 3, 4, 5, 6, 7, 8]);
        let second = Frame::new(2, vec![9u8, 10]);
        let mut wire = BytesMut::new();
        first.encode(&mut wire);
        second.encode(&mut wire);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&wire[..7]); // partial header
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[7..12]); // header + partial body
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[12..]);
        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap(), second);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_body_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(VERSION);
        buf.put_i32(1);
        buf.put_u32((MAX_BODY_LEN + 1) as u32);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(Error::BodyTooLarge(_))
        ));
    }

    #[test]
    fn decode_exact_rejects_truncated_input() {
        let encoded = Frame::new(5, &b"hello"[..]).encode_to_bytes();
        assert!(matches!(
            Frame::decode_exact(&encoded[..encoded.len() - 1]),
            Err(Error::Incomplete)
        ));
    }
}
