//! PRELOGIN packet framing for the tunneled TLS handshake.
//!
//! While the handshake is pending, outbound TLS records are wrapped in TDS
//! PRELOGIN packets and inbound PRELOGIN packets are unwrapped before the
//! bytes reach rustls. After [`PreloginFramedStream::handshake_complete`]
//! the stream is a transparent pass-through.

use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const HEADER_SIZE: usize = 8;
const PACKET_TYPE_PRELOGIN: u8 = 0x12;
const STATUS_EOM: u8 = 0x01;

/// Stream adapter that frames handshake bytes as PRELOGIN packets.
pub struct PreloginFramedStream<S> {
    stream: S,
    handshaking: bool,

    // Inbound state: current packet header and unread payload bytes.
    header_buf: [u8; HEADER_SIZE],
    header_pos: usize,
    payload_remaining: usize,

    // Outbound state: buffered record bytes awaiting a flush, which wraps
    // them into one PRELOGIN packet.
    write_buf: Vec<u8>,
    write_pos: usize,
    header_written: bool,
}

impl<S> PreloginFramedStream<S> {
    /// Wrap a stream; framing is active until the handshake completes.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            handshaking: true,
            header_buf: [0; HEADER_SIZE],
            header_pos: 0,
            payload_remaining: 0,
            write_buf: vec![0; HEADER_SIZE],
            write_pos: HEADER_SIZE,
            header_written: false,
        }
    }

    /// Switch to pass-through mode.
    pub fn handshake_complete(&mut self) {
        self.handshaking = false;
    }

    /// The wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Consume the wrapper.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PreloginFramedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.handshaking {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        // Between packets: read the next header first.
        if this.payload_remaining == 0 {
            while this.header_pos < HEADER_SIZE {
                let mut header_read = ReadBuf::new(&mut this.header_buf[this.header_pos..]);
                match Pin::new(&mut this.stream).poll_read(cx, &mut header_read)? {
                    Poll::Ready(()) => {
                        let n = header_read.filled().len();
                        if n == 0 {
                            return Poll::Ready(Ok(()));
                        }
                        this.header_pos += n;
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            if this.header_buf[0] != PACKET_TYPE_PRELOGIN {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "expected PRELOGIN packet during handshake, got 0x{:02X}",
                        this.header_buf[0]
                    ),
                )));
            }
            let length =
                u16::from_be_bytes([this.header_buf[2], this.header_buf[3]]) as usize;
            this.payload_remaining = length.saturating_sub(HEADER_SIZE);
            this.header_pos = 0;
        }

        let max_read = cmp::min(this.payload_remaining, buf.remaining());
        if max_read == 0 {
            return Poll::Ready(Ok(()));
        }

        let mut scratch = vec![0u8; max_read];
        let mut scratch_buf = ReadBuf::new(&mut scratch);
        match Pin::new(&mut this.stream).poll_read(cx, &mut scratch_buf)? {
            Poll::Ready(()) => {
                let n = scratch_buf.filled().len();
                buf.put_slice(&scratch[..n]);
                this.payload_remaining -= n;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PreloginFramedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.handshaking {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        this.write_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.handshaking && this.write_buf.len() > HEADER_SIZE {
            if !this.header_written {
                let total = this.write_buf.len();
                this.write_buf[0] = PACKET_TYPE_PRELOGIN;
                this.write_buf[1] = STATUS_EOM;
                this.write_buf[2] = (total >> 8) as u8;
                this.write_buf[3] = total as u8;
                this.write_buf[4] = 0;
                this.write_buf[5] = 0;
                this.write_buf[6] = 1;
                this.write_buf[7] = 0;
                this.header_written = true;
                this.write_pos = 0;
            }

            while this.write_pos < this.write_buf.len() {
                match Pin::new(&mut this.stream)
                    .poll_write(cx, &this.write_buf[this.write_pos..])?
                {
                    Poll::Ready(n) => this.write_pos += n,
                    Poll::Pending => return Poll::Pending,
                }
            }

            this.write_buf.truncate(HEADER_SIZE);
            this.write_pos = HEADER_SIZE;
            this.header_written = false;
        }

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn wraps_writes_in_prelogin_packets() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut wrapped = PreloginFramedStream::new(client);

        wrapped.write_all(b"client hello").await.unwrap();
        wrapped.flush().await.unwrap();

        let mut raw = [0u8; HEADER_SIZE + 12];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw[0], PACKET_TYPE_PRELOGIN);
        assert_eq!(raw[1], STATUS_EOM);
        assert_eq!(u16::from_be_bytes([raw[2], raw[3]]) as usize, raw.len());
        assert_eq!(&raw[HEADER_SIZE..], b"client hello");
    }

    #[tokio::test]
    async fn unwraps_reads_across_packets() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut wrapped = PreloginFramedStream::new(client);

        for body in [b"server ".as_slice(), b"hello".as_slice()] {
            let mut packet = Vec::new();
            packet.push(PACKET_TYPE_PRELOGIN);
            packet.push(STATUS_EOM);
            packet.extend_from_slice(&((HEADER_SIZE + body.len()) as u16).to_be_bytes());
            packet.extend_from_slice(&[0, 0, 1, 0]);
            packet.extend_from_slice(body);
            server.write_all(&packet).await.unwrap();
        }

        let mut out = vec![0u8; 12];
        wrapped.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"server hello");
    }

    #[tokio::test]
    async fn pass_through_after_handshake() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut wrapped = PreloginFramedStream::new(client);
        wrapped.handshake_complete();

        wrapped.write_all(b"raw tls record").await.unwrap();
        wrapped.flush().await.unwrap();

        let mut raw = [0u8; 14];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw, b"raw tls record");
    }

    #[tokio::test]
    async fn non_prelogin_packet_during_handshake_errors() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut wrapped = PreloginFramedStream::new(client);

        let mut packet = vec![0x04u8, 0x01];
        packet.extend_from_slice(&9u16.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 1, 0, 0xAA]);
        server.write_all(&packet).await.unwrap();

        let mut out = [0u8; 1];
        let err = wrapped.read_exact(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
