//! Packet framing for the built-in protocols.
//!
//! Stream frames: `[len: u32][kind: u32][payload]`, `len` covering kind and
//! payload. Message-transport packets drop the length: `[kind: u32][payload]`.
//! All integers big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::ProtocolError;

/// First packet a client must send.
pub const HANDSHAKE_PACKET: u32 = 160;
/// Server reply once the session is registered.
pub const HANDSHAKE_ACK_PACKET: u32 = 161;

const LEN_FIELD: usize = 4;
const KIND_FIELD: usize = 4;
/// Most the decoder reserves ahead of bytes that have not arrived yet.
const MAX_RESERVE: usize = 64 * 1024;

/// One protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(kind: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Message-transport encoding.
    pub fn to_datagram(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(KIND_FIELD + self.payload.len());
        buf.put_u32(self.kind);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn from_datagram(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < KIND_FIELD {
            return Err(ProtocolError::FrameTooShort { len: bytes.len() });
        }
        let mut buf = bytes;
        let kind = buf.get_u32();
        Ok(Self::new(kind, Bytes::copy_from_slice(buf)))
    }

    /// Stream encoding.
    pub fn to_frame(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(LEN_FIELD + KIND_FIELD + self.payload.len());
        buf.put_u32((KIND_FIELD + self.payload.len()) as u32);
        buf.put_u32(self.kind);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Length-prefixed packet codec for the stream transport.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_frame_length: usize,
}

impl PacketCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
        if src.len() < LEN_FIELD {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len < KIND_FIELD {
            return Err(ProtocolError::FrameTooShort { len });
        }
        if len > self.max_frame_length {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_length,
            });
        }
        if src.len() < LEN_FIELD + len {
            src.reserve((LEN_FIELD + len - src.len()).min(MAX_RESERVE));
            return Ok(None);
        }

        src.advance(LEN_FIELD);
        let kind = src.get_u32();
        let payload = src.split_to(len - KIND_FIELD).freeze();
        Ok(Some(Packet { kind, payload }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = KIND_FIELD + packet.payload.len();
        if len > self.max_frame_length {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_length,
            });
        }
        dst.reserve(LEN_FIELD + len);
        dst.put_u32(len as u32);
        dst.put_u32(packet.kind);
        dst.extend_from_slice(&packet.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_across_partial_reads() {
        let mut codec = PacketCodec::new(1024);
        let frame = Packet::new(7, &b"hello"[..]).to_frame();

        let mut buf = BytesMut::from(&frame[..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[6..]);
        buf.extend_from_slice(&Packet::new(8, Bytes::new()).to_frame());

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, Packet::new(7, &b"hello"[..]));
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.kind, 8);
        assert!(second.payload.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_and_undersized_frames() {
        let mut codec = PacketCodec::new(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { len: 17, max: 16 })
        ));

        let mut buf = BytesMut::new();
        buf.put_u32(2);
        assert!(matches!(codec.decode(&mut buf), Err(ProtocolError::FrameTooShort { len: 2 })));
    }

    #[test]
    fn large_length_header_does_not_reserve_the_whole_frame() {
        let mut codec = PacketCodec::new(50 * 1024 * 1024);
        let mut buf = BytesMut::new();
        buf.put_u32(40 * 1024 * 1024);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.capacity() <= 2 * MAX_RESERVE);
    }

    #[test]
    fn encoder_matches_to_frame() {
        let mut codec = PacketCodec::new(1024);
        let packet = Packet::new(HANDSHAKE_PACKET, &b"v1"[..]);
        let mut dst = BytesMut::new();
        codec.encode(packet.clone(), &mut dst).unwrap();
        assert_eq!(dst.freeze(), packet.to_frame());
    }

    #[test]
    fn datagram_requires_kind() {
        assert!(Packet::from_datagram(&[0, 0, 1]).is_err());
        let packet = Packet::from_datagram(&Packet::new(3, &b"x"[..]).to_datagram()).unwrap();
        assert_eq!(packet, Packet::new(3, &b"x"[..]));
    }
}
