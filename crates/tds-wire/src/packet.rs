//! TDS packet header definitions.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::WireError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Maximum negotiable TDS packet size.
pub const MAX_PACKET_SIZE: usize = 32_767;

/// Default TDS packet size before negotiation.
pub const DEFAULT_PACKET_SIZE: usize = 4_096;

/// TDS packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL batch request.
    SqlBatch = 0x01,
    /// Tabular response.
    TabularResult = 0x04,
    /// Attention signal (cancellation).
    Attention = 0x06,
    /// Bulk load data.
    BulkLoad = 0x07,
    /// Federated authentication token.
    FedAuthToken = 0x08,
    /// TDS7+ login.
    Login7 = 0x10,
    /// Pre-login negotiation.
    PreLogin = 0x12,
}

impl PacketType {
    /// Map a raw byte to a packet type.
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Self::SqlBatch),
            0x04 => Ok(Self::TabularResult),
            0x06 => Ok(Self::Attention),
            0x07 => Ok(Self::BulkLoad),
            0x08 => Ok(Self::FedAuthToken),
            0x10 => Ok(Self::Login7),
            0x12 => Ok(Self::PreLogin),
            other => Err(WireError::InvalidPacketType(other)),
        }
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// More packets follow in this message.
        const NORMAL = 0x00;
        /// Final packet of the message.
        const END_OF_MESSAGE = 0x01;
        /// Ignore this event (paired with EOM on attention).
        const IGNORE_EVENT = 0x02;
        /// Reset connection state before executing.
        const RESET_CONNECTION = 0x08;
    }
}

/// The 8-byte header that precedes every TDS packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total length including this header, big-endian on the wire.
    pub length: u16,
    /// Server process ID, echoed by the server.
    pub spid: u16,
    /// Sequence number within the message, wrapping mod 256.
    pub packet_id: u8,
    /// Window, always 0.
    pub window: u8,
}

impl PacketHeader {
    /// Create a header with zeroed spid/packet_id.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Decode a header from the start of `src`.
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(WireError::incomplete(PACKET_HEADER_SIZE, src.remaining()));
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status_byte = src.get_u8();
        let status = PacketStatus::from_bits(status_byte)
            .ok_or(WireError::InvalidPacketStatus(status_byte))?;
        let length = src.get_u16();
        if (length as usize) < PACKET_HEADER_SIZE {
            return Err(WireError::InvalidPacketLength(length));
        }
        let spid = src.get_u16();
        let packet_id = src.get_u8();
        let window = src.get_u8();

        Ok(Self {
            packet_type,
            status,
            length,
            spid,
            packet_id,
            window,
        })
    }

    /// Encode the header into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Payload length (total minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Whether this packet ends its message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn header_round_trips() {
        let header = PacketHeader {
            packet_type: PacketType::SqlBatch,
            status: PacketStatus::END_OF_MESSAGE,
            length: 100,
            spid: 54,
            packet_id: 3,
            window: 0,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);

        let mut cursor = buf.as_ref();
        assert_eq!(PacketHeader::decode(&mut cursor).unwrap(), header);
    }

    #[test]
    fn length_is_big_endian() {
        let header = PacketHeader::new(
            PacketType::TabularResult,
            PacketStatus::END_OF_MESSAGE,
            0x1234,
        );
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf[2], 0x12);
        assert_eq!(buf[3], 0x34);
    }

    #[test]
    fn undersized_length_is_rejected() {
        let raw = [0x04u8, 0x01, 0x00, 0x04, 0x00, 0x00, 0x01, 0x00];
        let mut cursor = raw.as_ref();
        assert!(matches!(
            PacketHeader::decode(&mut cursor),
            Err(WireError::InvalidPacketLength(4))
        ));
    }

    #[test]
    fn unknown_packet_type_is_rejected() {
        assert!(PacketType::from_u8(0x0E).is_err());
        assert_eq!(PacketType::from_u8(0x12).unwrap(), PacketType::PreLogin);
    }
}
