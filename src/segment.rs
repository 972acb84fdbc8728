use bytes::{BufMut, BytesMut};
use std::fmt::{Debug, Formatter};
use crate::checksum;
use crate::packet_header::{PacketFlags, PacketHeader};
use crate::util::safe_converter::{PrecheckedCast, SafeCast};

/// Reasons for discarding a received datagram. These never leave the crate as errors: a packet
///  that fails to parse is dropped without acknowledgement, relying on the peer's retransmission.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum PacketError {
    #[error("datagram is shorter than the packet header")]
    BufferTooShort,
    #[error("declared payload length {declared} does not match the {actual} bytes available")]
    LengthMismatch { declared: u32, actual: usize },
    #[error("unknown packet flags {0}")]
    UnknownFlags(u8),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("{0:?} packet with unexpected payload length {1}")]
    UnexpectedPayload(PacketFlags, u32),
}

/// A header plus its payload - constructed for a single transmission attempt (or retransmission
///  of the identical bytes) and discarded after it was acknowledged.
///
/// Constructors seal the header's checksum, so a constructed segment compares equal to the same
///  segment parsed from the wire.
#[derive(Clone, Eq, PartialEq)]
pub struct Segment {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Debug for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SEG{{{:?}}}", self.header)
    }
}

impl Segment {
    pub fn control(flags: PacketFlags, sequence: u32) -> Segment {
        debug_assert!(flags.is_control());
        Segment {
            header: PacketHeader::new(flags, sequence, 0),
            payload: Vec::new(),
        }.sealed()
    }

    /// NB: the caller is responsible for respecting the configured maximum segment size
    pub fn data(sequence: u32, payload: &[u8]) -> Segment {
        debug_assert!(!payload.is_empty());
        Segment {
            header: PacketHeader::new(PacketFlags::Data, sequence, payload.len().prechecked_cast()),
            payload: payload.to_vec(),
        }.sealed()
    }

    fn sealed(mut self) -> Segment {
        let datagram = self.to_datagram();
        self.header.checksum = u16::from_be_bytes([
            datagram[PacketHeader::OFFSET_CHECKSUM],
            datagram[PacketHeader::OFFSET_CHECKSUM + 1],
        ]);
        self
    }

    pub fn flags(&self) -> PacketFlags {
        self.header.flags
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn serialized_len(&self) -> usize {
        PacketHeader::SERIALIZED_LEN + self.payload.len()
    }

    /// Serializes the segment into a datagram, computing the checksum over the header (with a
    ///  zeroed checksum field) and the payload and patching it into the header.
    pub fn ser(&self, buf: &mut BytesMut) {
        let start = buf.len();

        PacketHeader {
            checksum: 0,
            ..self.header
        }.ser(buf);
        buf.put_slice(&self.payload);

        let checksum = checksum::compute(&buf[start..]);
        (&mut buf[start + PacketHeader::OFFSET_CHECKSUM..]).put_u16(checksum);
    }

    pub fn to_datagram(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf
    }

    /// Parses and validates a received datagram. A packet is accepted only if its declared
    ///  payload length matches the bytes actually received, its flags are known, control
    ///  packets have no payload and DATA packets do, and its checksum verifies.
    pub fn deser(datagram: &[u8]) -> Result<Segment, PacketError> {
        let mut parse_buf = datagram;
        let header = PacketHeader::deser(&mut parse_buf)?;

        let payload_length: usize = header.payload_length.safe_cast();
        if payload_length != parse_buf.len() {
            return Err(PacketError::LengthMismatch { declared: header.payload_length, actual: parse_buf.len() });
        }

        if header.flags.is_control() == (header.payload_length > 0) {
            return Err(PacketError::UnexpectedPayload(header.flags, header.payload_length));
        }

        let mut scratch = datagram.to_vec();
        scratch[PacketHeader::OFFSET_CHECKSUM..PacketHeader::SERIALIZED_LEN].fill(0);
        if !checksum::verify(&scratch, header.checksum) {
            return Err(PacketError::ChecksumMismatch);
        }

        Ok(Segment {
            header,
            payload: parse_buf.to_vec(),
        })
    }
}
