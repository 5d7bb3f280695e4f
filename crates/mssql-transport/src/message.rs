//! Multi-packet message reassembly.
//!
//! A TDS message is a run of packets of one type whose final packet carries
//! the END_OF_MESSAGE status bit.

use bytes::{Bytes, BytesMut};
use tds_wire::PacketType;

use crate::frame::Packet;

/// A complete reassembled message.
#[derive(Debug, Clone)]
pub struct Message {
    /// The message's packet type.
    pub packet_type: PacketType,
    /// Concatenated payload of all packets.
    pub payload: Bytes,
}

/// Accumulates packets until END_OF_MESSAGE.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
}

impl MessageAssembler {
    /// New, empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a packet; returns the message when this packet completes one.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        if self.packet_type.is_none() {
            self.packet_type = Some(packet.header.packet_type);
        }
        self.buffer.extend_from_slice(&packet.payload);

        if packet.is_end_of_message() {
            let packet_type = self.packet_type.take()?;
            Some(Message {
                packet_type,
                payload: self.buffer.split().freeze(),
            })
        } else {
            None
        }
    }

    /// Whether a partial message is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Drop any partial state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::{PacketHeader, PacketStatus};

    fn packet(eom: bool, payload: &[u8]) -> Packet {
        let status = if eom {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        Packet::new(
            PacketHeader::new(PacketType::TabularResult, status, 0),
            BytesMut::from(payload),
        )
    }

    #[test]
    fn single_packet_message() {
        let mut assembler = MessageAssembler::new();
        let message = assembler.push(packet(true, b"hello")).unwrap();
        assert_eq!(&message.payload[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn multi_packet_concatenation() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push(packet(false, b"hello ")).is_none());
        assert!(assembler.has_partial());
        assert!(assembler.push(packet(false, b"world")).is_none());
        let message = assembler.push(packet(true, b"!")).unwrap();
        assert_eq!(&message.payload[..], b"hello world!");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn clear_discards_partial() {
        let mut assembler = MessageAssembler::new();
        assembler.push(packet(false, b"partial"));
        assembler.clear();
        assert!(!assembler.has_partial());
        let message = assembler.push(packet(true, b"next")).unwrap();
        assert_eq!(&message.payload[..], b"next");
    }
}
