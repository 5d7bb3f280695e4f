//! TDS packet frame codec for tokio-util.

use bytes::{BufMut, BytesMut};
use tds_wire::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;

/// A single TDS packet: header plus payload.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet header. `length` is stamped by the encoder.
    pub header: PacketHeader,
    /// Payload bytes (header excluded).
    pub payload: BytesMut,
}

impl Packet {
    /// Create a packet from a header and payload.
    #[must_use]
    pub fn new(header: PacketHeader, payload: BytesMut) -> Self {
        Self { header, payload }
    }

    /// Whether this packet ends its message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// Frame codec splitting a byte stream into TDS packets.
///
/// The maximum accepted frame follows the negotiated packet size; the
/// server may not send frames larger than what LOGIN7 negotiated.
#[derive(Debug)]
pub struct TdsFrameCodec {
    max_packet_size: usize,
}

impl TdsFrameCodec {
    /// Codec with the protocol maximum frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Update the maximum after packet-size negotiation.
    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size.min(MAX_PACKET_SIZE);
    }

    /// Currently accepted maximum frame size.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for TdsFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsFrameCodec {
    type Item = Packet;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        // Length is big-endian at bytes 2..4 of the header.
        let length = u16::from_be_bytes([src[2], src[3]]) as usize;
        if length < PACKET_HEADER_SIZE {
            return Err(tds_wire::WireError::InvalidPacketLength(length as u16).into());
        }
        if length > self.max_packet_size {
            return Err(TransportError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length);
        let mut cursor = frame.as_ref();
        let header = PacketHeader::decode(&mut cursor)?;
        let payload = BytesMut::from(&frame[PACKET_HEADER_SIZE..]);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            packet_id = header.packet_id,
            eom = header.is_end_of_message(),
            "decoded packet"
        );

        Ok(Some(Packet::new(header, payload)))
    }
}

impl Encoder<Packet> for TdsFrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = PACKET_HEADER_SIZE + item.payload.len();
        if total > self.max_packet_size {
            return Err(TransportError::PacketTooLarge {
                size: total,
                max: self.max_packet_size,
            });
        }

        dst.reserve(total);
        let mut header = item.header;
        header.length = total as u16;
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total,
            packet_id = header.packet_id,
            eom = header.is_end_of_message(),
            "encoded packet"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::{PacketStatus, PacketType};

    #[test]
    fn decode_complete_packet() {
        let mut codec = TdsFrameCodec::new();
        let mut data = BytesMut::new();
        data.put_u8(PacketType::SqlBatch as u8);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(12);
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);
        data.put_slice(b"test");

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::SqlBatch);
        assert_eq!(&packet.payload[..], b"test");
        assert!(data.is_empty());
    }

    #[test]
    fn incomplete_packet_waits() {
        let mut codec = TdsFrameCodec::new();
        let mut data = BytesMut::new();
        data.put_u8(PacketType::SqlBatch as u8);
        data.put_u8(0x01);
        data.put_u16(12);
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);
        // Payload missing.
        assert!(codec.decode(&mut data).unwrap().is_none());
        assert_eq!(data.len(), 8);
    }

    #[test]
    fn oversized_packet_is_rejected() {
        let mut codec = TdsFrameCodec::new();
        codec.set_max_packet_size(512);
        let mut data = BytesMut::new();
        data.put_u8(PacketType::TabularResult as u8);
        data.put_u8(0x01);
        data.put_u16(1024);
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);
        assert!(matches!(
            codec.decode(&mut data),
            Err(TransportError::PacketTooLarge { size: 1024, .. })
        ));
    }

    #[test]
    fn encode_stamps_length() {
        let mut codec = TdsFrameCodec::new();
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0);
        let packet = Packet::new(header, BytesMut::from(&b"abcd"[..]));
        let mut dst = BytesMut::new();
        codec.encode(packet, &mut dst).unwrap();
        assert_eq!(dst.len(), 12);
        assert_eq!(u16::from_be_bytes([dst[2], dst[3]]), 12);
    }
}
