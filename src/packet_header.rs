use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::{Debug, Formatter};
use crate::segment::PacketError;

/// The kind of a packet. Every packet carries exactly one of these.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum PacketFlags {
    /// handshake initiation, sent by the dialer
    Syn = 1,
    /// handshake reply, sent by the listener
    SynAck = 2,
    /// acknowledges a handshake SYN_ACK, a DATA segment (same sequence number) or a FIN_ACK
    Ack = 3,
    /// termination request from the closing peer
    Fin = 4,
    /// acknowledgement of a FIN, combined with the responder's own termination notice
    FinAck = 5,
    Data = 6,
}

impl PacketFlags {
    pub fn is_control(&self) -> bool {
        *self != PacketFlags::Data
    }
}

/// Fixed-size header at the start of every packet - all numbers in network byte order (BE):
///
/// ```ascii
/// 0: flags (u8)
/// 1: sequence number (u32)
/// 5: payload length (u32), 0 for control packets
/// 9: checksum (u16) over the header with this field zeroed, followed by the payload
/// ```
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    pub sequence: u32,
    pub payload_length: u32,
    pub checksum: u16,
}

impl Debug for PacketHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}#{}[{}]{{{:04x}}}", self.flags, self.sequence, self.payload_length, self.checksum)
    }
}

impl PacketHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u8>()  // flags
        + size_of::<u32>()   // sequence
        + size_of::<u32>()   // payload length
        + size_of::<u16>();  // checksum

    pub const OFFSET_CHECKSUM: usize = Self::SERIALIZED_LEN - size_of::<u16>();

    pub fn new(flags: PacketFlags, sequence: u32, payload_length: u32) -> PacketHeader {
        PacketHeader {
            flags,
            sequence,
            payload_length,
            checksum: 0,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags.into());
        buf.put_u32(self.sequence);
        buf.put_u32(self.payload_length);
        buf.put_u16(self.checksum);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<PacketHeader, PacketError> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let raw_flags = buf.get_u8();
        let flags = PacketFlags::try_from(raw_flags)
            .map_err(|_| PacketError::UnknownFlags(raw_flags))?;
        let sequence = buf.get_u32();
        let payload_length = buf.get_u32();
        let checksum = buf.get_u16();

        Ok(PacketHeader {
            flags,
            sequence,
            payload_length,
            checksum,
        })
    }
}
