//! Segment encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::RudpError;

pub const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentKind {
    Syn = 1,
    SynAck = 2,
    Data = 3,
    Ack = 4,
    Fin = 5,
}

impl TryFrom<u8> for SegmentKind {
    type Error = RudpError;

    fn try_from(value: u8) -> Result<Self, RudpError> {
        match value {
            1 => Ok(SegmentKind::Syn),
            2 => Ok(SegmentKind::SynAck),
            3 => Ok(SegmentKind::Data),
            4 => Ok(SegmentKind::Ack),
            5 => Ok(SegmentKind::Fin),
            other => Err(RudpError::UnknownKind(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub seq: u32,
    pub payload: Bytes,
}

impl Segment {
    pub fn control(kind: SegmentKind, seq: u32) -> Self {
        Self {
            kind,
            seq,
            payload: Bytes::new(),
        }
    }

    pub fn data(seq: u32, payload: Bytes) -> Self {
        Self {
            kind: SegmentKind::Data,
            seq,
            payload,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.seq);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, RudpError> {
        if datagram.len() < HEADER_LEN {
            return Err(RudpError::Malformed { len: datagram.len() });
        }
        let mut buf = datagram;
        let kind = SegmentKind::try_from(buf.get_u8())?;
        let seq = buf.get_u32();
        Ok(Self {
            kind,
            seq,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_segment_layout() {
        let encoded = Segment::data(0x0102_0304, Bytes::from_static(b"hi")).encode();
        assert_eq!(&encoded[..], &[3, 1, 2, 3, 4, b'h', b'i']);
        let decoded = Segment::decode(&encoded).unwrap();
        assert_eq!(decoded.kind, SegmentKind::Data);
        assert_eq!(decoded.seq, 0x0102_0304);
        assert_eq!(&decoded.payload[..], b"hi");
    }

    #[test]
    fn rejects_short_and_unknown() {
        assert!(matches!(Segment::decode(&[3, 0, 0]), Err(RudpError::Malformed { len: 3 })));
        assert!(matches!(Segment::decode(&[9, 0, 0, 0, 0]), Err(RudpError::UnknownKind(9))));
    }
}
