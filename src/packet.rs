use std::fmt::{Debug, Display, Formatter};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::error::SwpError;

/// kind tag (u8) + sequence number (u32 BE)
pub const HEADER_LEN: usize = 5;

/// This leaves room for IP and UDP headers inside a regular Ethernet frame
pub const MAX_PAYLOAD_LEN: usize = 1400;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum PacketKind {
    Data = 0x44, // 'D'
    Ack = 0x41, // 'A'
}

/// A single protocol packet. DATA packets carry a chunk of application payload, ACK packets
///  carry the cumulative sequence number they acknowledge and (usually) an empty payload.
#[derive(Clone, Eq, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub sequence_number: u32,
    pub payload: Bytes,
}

impl Debug for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Packet{{{:?} #{} len={}}}", self.kind, self.sequence_number, self.payload.len())
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            PacketKind::Data => write!(f, "DATA #{} ({} bytes)", self.sequence_number, self.payload.len()),
            PacketKind::Ack => write!(f, "ACK #{}", self.sequence_number),
        }
    }
}

impl Packet {
    pub fn data(sequence_number: u32, payload: Bytes) -> Result<Packet, SwpError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(SwpError::PayloadTooLarge { len: payload.len(), max: MAX_PAYLOAD_LEN });
        }
        Ok(Packet {
            kind: PacketKind::Data,
            sequence_number,
            payload,
        })
    }

    pub fn ack(sequence_number: u32) -> Packet {
        Packet {
            kind: PacketKind::Ack,
            sequence_number,
            payload: Bytes::new(),
        }
    }

    pub fn serialized_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind.into());
        buf.put_u32(self.sequence_number);
        buf.put_slice(&self.payload);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    /// The payload is everything after the header, possibly empty. Only the header is validated.
    pub fn decode(mut buf: &[u8]) -> Result<Packet, SwpError> {
        if buf.len() < HEADER_LEN {
            return Err(SwpError::MalformedPacket(format!("{} bytes are too short for a header", buf.len())));
        }

        let raw_kind = buf.get_u8();
        let kind = PacketKind::try_from_primitive(raw_kind)
            .map_err(|_| SwpError::MalformedPacket(format!("unknown kind tag {:#04x}", raw_kind)))?;
        let sequence_number = buf.get_u32();

        Ok(Packet {
            kind,
            sequence_number,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}
