//! Split-I/O TDS transport.
//!
//! The stream is split into read and write halves so an ATTENTION packet
//! can be written while a read of streaming results is in flight. The
//! write half sits behind an async mutex shared with [`AttentionHandle`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tds_wire::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::TransportError;
use crate::frame::{Packet, TdsFrameCodec};
use crate::message::{Message, MessageAssembler};

type Writer<T> = Arc<Mutex<FramedWrite<WriteHalf<T>, TdsFrameCodec>>>;

/// Packet transport over a (possibly TLS-wrapped) socket.
pub struct Transport<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: FramedRead<ReadHalf<T>, TdsFrameCodec>,
    writer: Writer<T>,
    assembler: MessageAssembler,
    packet_size: usize,
    cancelling: Arc<AtomicBool>,
}

impl<T> Transport<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Wrap a stream, splitting it into framed halves.
    pub fn new(stream: T) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FramedRead::new(read_half, TdsFrameCodec::new()),
            writer: Arc::new(Mutex::new(FramedWrite::new(write_half, TdsFrameCodec::new()))),
            assembler: MessageAssembler::new(),
            packet_size: tds_wire::DEFAULT_PACKET_SIZE,
            cancelling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Apply the packet size negotiated during login.
    ///
    /// Outbound messages are split at this size; inbound frames above it
    /// are rejected as framing errors.
    pub async fn set_packet_size(&mut self, size: usize) {
        let size = size.clamp(512, tds_wire::MAX_PACKET_SIZE);
        self.packet_size = size;
        self.reader.decoder_mut().set_max_packet_size(size);
        self.writer.lock().await.encoder_mut().set_max_packet_size(size);
        tracing::debug!(packet_size = size, "negotiated packet size applied");
    }

    /// Currently negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Handle for sending ATTENTION from another task.
    #[must_use]
    pub fn attention_handle(&self) -> AttentionHandle<T> {
        AttentionHandle {
            writer: Arc::clone(&self.writer),
            cancelling: Arc::clone(&self.cancelling),
        }
    }

    /// Whether an ATTENTION has been sent and not yet acknowledged.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }

    /// Mark the pending cancellation acknowledged.
    pub fn cancel_acknowledged(&self) {
        self.cancelling.store(false, Ordering::Release);
    }

    /// Send a complete message, splitting the payload into packets of the
    /// negotiated size. Packet ids run 1, 2, ... mod 256 within the
    /// message; the final packet carries END_OF_MESSAGE.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let max_payload = self.packet_size - PACKET_HEADER_SIZE;
        let mut writer = self.writer.lock().await;

        if payload.is_empty() {
            let mut header =
                PacketHeader::new(packet_type, PacketStatus::END_OF_MESSAGE, 0);
            header.packet_id = 1;
            writer.feed(Packet::new(header, BytesMut::new())).await?;
        } else {
            let chunks: Vec<_> = payload.chunks(max_payload).collect();
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.into_iter().enumerate() {
                let status = if i == last {
                    PacketStatus::END_OF_MESSAGE
                } else {
                    PacketStatus::NORMAL
                };
                let mut header = PacketHeader::new(packet_type, status, 0);
                header.packet_id = ((i + 1) & 0xFF) as u8;
                writer.feed(Packet::new(header, BytesMut::from(chunk))).await?;
            }
        }

        writer.flush().await?;
        Ok(())
    }

    /// Read the next packet. `Ok(None)` means the peer closed the socket
    /// between messages.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        match self.reader.next().await {
            Some(result) => result.map(Some),
            None => {
                if self.assembler.has_partial() {
                    Err(TransportError::ConnectionClosed)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Feed a packet through the assembler, returning a message when
    /// complete. Used by callers that interleave packet-level reads.
    pub fn assemble(&mut self, packet: Packet) -> Option<Message> {
        self.assembler.push(packet)
    }

    /// Read packets until a complete message is assembled.
    pub async fn read_message(&mut self) -> Result<Message, TransportError> {
        loop {
            match self.reader.next().await {
                Some(Ok(packet)) => {
                    if let Some(message) = self.assembler.push(packet) {
                        return Ok(message);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    /// Whether a partially assembled inbound message is buffered.
    #[must_use]
    pub fn has_partial_message(&self) -> bool {
        self.assembler.has_partial()
    }

    /// Discard inbound reassembly state before starting a new operation.
    pub fn clear_receive_state(&mut self) {
        self.assembler.clear();
    }
}

impl<T> std::fmt::Debug for Transport<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("packet_size", &self.packet_size)
            .field("partial_message", &self.assembler.has_partial())
            .field("cancelling", &self.is_cancelling())
            .finish_non_exhaustive()
    }
}

/// Out-of-band cancellation handle.
///
/// Cloneable; sending is idempotent while a cancellation is pending.
pub struct AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: Writer<T>,
    cancelling: Arc<AtomicBool>,
}

impl<T> AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Send a header-only ATTENTION packet.
    ///
    /// Returns `false` when a cancellation was already pending (the packet
    /// is not re-sent).
    pub async fn send_attention(&self) -> Result<bool, TransportError> {
        if self.cancelling.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        tracing::debug!("sending ATTENTION");
        let mut writer = self.writer.lock().await;
        let mut header = PacketHeader::new(
            PacketType::Attention,
            PacketStatus::END_OF_MESSAGE,
            PACKET_HEADER_SIZE as u16,
        );
        header.packet_id = 1;
        writer.feed(Packet::new(header, BytesMut::new())).await?;
        writer.flush().await?;
        Ok(true)
    }

    /// Whether a cancellation is pending acknowledgment.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }
}

impl<T> Clone for AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            cancelling: Arc::clone(&self.cancelling),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn message_splits_at_packet_size() {
        let (client, mut server) = tokio::io::duplex(1 << 20);
        let mut transport = Transport::new(client);
        transport.set_packet_size(512).await;

        // 1000-byte payload -> two packets (504 + 496).
        let payload = Bytes::from(vec![0xABu8; 1000]);
        transport
            .send_message(PacketType::SqlBatch, payload)
            .await
            .unwrap();
        drop(transport);

        use tokio::io::AsyncReadExt;
        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();

        // First packet: full size, id 1, no EOM.
        assert_eq!(u16::from_be_bytes([raw[2], raw[3]]), 512);
        assert_eq!(raw[1] & 0x01, 0);
        assert_eq!(raw[6], 1);
        // Second packet: remainder, id 2, EOM.
        let second = &raw[512..];
        assert_eq!(u16::from_be_bytes([second[2], second[3]]), 8 + 496);
        assert_eq!(second[1] & 0x01, 1);
        assert_eq!(second[6], 2);
        // Total payload bytes across packets equals the original.
        assert_eq!(raw.len(), 512 + 8 + 496);
    }

    #[tokio::test]
    async fn packet_ids_are_consecutive_and_single_eom() {
        let (client, mut server) = tokio::io::duplex(1 << 22);
        let mut transport = Transport::new(client);
        transport.set_packet_size(512).await;

        let payload = Bytes::from(vec![1u8; 504 * 300]);
        transport
            .send_message(PacketType::BulkLoad, payload)
            .await
            .unwrap();
        drop(transport);

        use tokio::io::AsyncReadExt;
        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();

        let mut pos = 0;
        let mut ids = Vec::new();
        let mut eom_count = 0;
        let mut payload_total = 0;
        while pos < raw.len() {
            let len = u16::from_be_bytes([raw[pos + 2], raw[pos + 3]]) as usize;
            ids.push(raw[pos + 6]);
            if raw[pos + 1] & 0x01 != 0 {
                eom_count += 1;
            }
            payload_total += len - 8;
            pos += len;
        }
        assert_eq!(ids.len(), 300);
        assert_eq!(eom_count, 1);
        assert_eq!(payload_total, 504 * 300);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(*id, ((i + 1) & 0xFF) as u8);
        }
    }

    #[tokio::test]
    async fn attention_is_header_only_and_idempotent() {
        let (client, mut server) = tokio::io::duplex(4096);
        let transport = Transport::new(client);
        let handle = transport.attention_handle();

        assert!(handle.send_attention().await.unwrap());
        assert!(!handle.send_attention().await.unwrap(), "second send is a no-op");
        assert!(handle.is_cancelling());
        transport.cancel_acknowledged();
        assert!(!handle.is_cancelling());
        drop(transport);
        drop(handle);

        use tokio::io::AsyncReadExt;
        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(raw[0], PacketType::Attention as u8);
        assert_eq!(raw[1] & 0x01, 1);
    }

    #[tokio::test]
    async fn read_message_reassembles() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut transport = Transport::new(client);

        // Server sends a two-packet tabular message.
        let mut raw = Vec::new();
        for (eom, body) in [(false, b"hello ".as_slice()), (true, b"world".as_slice())] {
            raw.push(PacketType::TabularResult as u8);
            raw.push(u8::from(eom));
            raw.extend_from_slice(&((8 + body.len()) as u16).to_be_bytes());
            raw.extend_from_slice(&[0, 0, 1, 0]);
            raw.extend_from_slice(body);
        }
        server.write_all(&raw).await.unwrap();

        let message = transport.read_message().await.unwrap();
        assert_eq!(message.packet_type, PacketType::TabularResult);
        assert_eq!(&message.payload[..], b"hello world");
    }

    #[tokio::test]
    async fn closed_mid_message_is_error() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut transport = Transport::new(client);

        let mut raw = Vec::new();
        raw.push(PacketType::TabularResult as u8);
        raw.push(0); // not EOM
        raw.extend_from_slice(&13u16.to_be_bytes());
        raw.extend_from_slice(&[0, 0, 1, 0]);
        raw.extend_from_slice(b"trunc");
        server.write_all(&raw).await.unwrap();
        drop(server);

        assert!(matches!(
            transport.read_message().await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
