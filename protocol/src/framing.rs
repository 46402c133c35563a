//! Length-prefixed framing over a byte stream
//!
//! TCP has no message boundaries, so a packet is only complete once the
//! number of bytes declared in its header has arrived. `PacketStream` owns
//! the connection and a per-connection scratch buffer that is reused for
//! both incoming payloads and outgoing packets.

use crate::constants::{HEADER_LEN, MAX_PACKET_LEN};
use crate::error::ProtocolError;
use crate::packets::{decode_header, PacketHeader};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub struct PacketStream<S> {
    stream: S,
    buf: Vec<u8>,
    /// Header bytes already read into `buf`
    pending: usize,
}

impl<S> PacketStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: vec![0u8; MAX_PACKET_LEN],
            pending: 0,
        }
    }
}

impl<S> PacketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wait until the next packet starts to arrive.
    ///
    /// Returns `false` when the peer closed the connection cleanly between
    /// packets. Bytes read here are kept for `read_header`, so the wait can
    /// be timed separately from the rest of the request and cancelled
    /// without losing data.
    pub async fn wait_for_packet(&mut self) -> Result<bool, ProtocolError> {
        if self.pending > 0 {
            return Ok(true);
        }
        let n = self.stream.read(&mut self.buf[..HEADER_LEN]).await?;
        self.pending = n;
        Ok(n > 0)
    }

    /// Read the next header.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly
    /// between packets. EOF in the middle of a header is an error.
    pub async fn read_header(&mut self) -> Result<Option<PacketHeader>, ProtocolError> {
        if !self.wait_for_packet().await? {
            return Ok(None);
        }
        while self.pending < HEADER_LEN {
            let n = self
                .stream
                .read(&mut self.buf[self.pending..HEADER_LEN])
                .await?;
            if n == 0 {
                self.pending = 0;
                return Err(ProtocolError::ConnectionClosed);
            }
            self.pending += n;
        }
        self.pending = 0;
        decode_header(&self.buf[..HEADER_LEN]).map(Some)
    }

    /// Read the payload announced by `header`
    pub async fn read_payload(&mut self, header: &PacketHeader) -> Result<&[u8], ProtocolError> {
        self.read_exact(header.payload_len()).await
    }

    /// Read a whole packet: header followed by its declared payload
    pub async fn read_packet(&mut self) -> Result<Option<(PacketHeader, &[u8])>, ProtocolError> {
        let Some(header) = self.read_header().await? else {
            return Ok(None);
        };
        let payload = self.read_payload(&header).await?;
        Ok(Some((header, payload)))
    }

    /// Read exactly `len` bytes into the scratch buffer
    pub async fn read_exact(&mut self, len: usize) -> Result<&[u8], ProtocolError> {
        if len > self.buf.len() {
            return Err(ProtocolError::BufferTooSmall {
                needed: len,
                available: self.buf.len(),
            });
        }
        self.stream
            .read_exact(&mut self.buf[..len])
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed,
                _ => ProtocolError::Io(e),
            })?;
        Ok(&self.buf[..len])
    }

    /// Read whatever raw bytes are available, at least one and at most `max`.
    ///
    /// Used for streamed file bodies, which carry no headers of their own.
    pub async fn read_chunk(&mut self, max: usize) -> Result<&[u8], ProtocolError> {
        let max = max.min(self.buf.len());
        if max == 0 {
            return Ok(&self.buf[..0]);
        }
        let n = self.stream.read(&mut self.buf[..max]).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(&self.buf[..n])
    }

    /// Encode a packet into the scratch buffer and send it
    pub async fn send<F>(&mut self, encode: F) -> Result<usize, ProtocolError>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, ProtocolError>,
    {
        let len = encode(&mut self.buf)?;
        self.stream.write_all(&self.buf[..len]).await?;
        self.stream.flush().await?;
        Ok(len)
    }

    /// Send bytes as-is (streamed bodies)
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        self.stream.flush().await?;
        Ok(())
    }
}
