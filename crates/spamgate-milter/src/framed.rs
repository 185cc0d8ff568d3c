//! Framed I/O for the milter protocol.
//!
//! Every packet is a big-endian `u32` length followed by that many bytes:
//! one command (or response) byte and its payload.

#![allow(clippy::missing_errors_doc)]

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Error, Result};
use crate::response::Response;

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Largest packet accepted from the MTA.
pub const MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// One packet as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command byte.
    pub code: u8,
    /// Payload after the command byte.
    pub payload: Bytes,
}

/// Framed connection for the milter protocol.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            read_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Reads the next packet.
    ///
    /// Returns `None` if the MTA closed the connection between packets.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut len = [0u8; 4];
        match self.reader.read_exact(&mut len).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len) as usize;
        if len == 0 {
            return Err(Error::protocol("zero-length packet"));
        }
        if len > MAX_PACKET_SIZE {
            return Err(Error::PacketTooLarge(len));
        }

        self.read_buffer.clear();
        self.read_buffer.resize(len, 0);
        self.reader.read_exact(&mut self.read_buffer[..]).await?;

        let mut data = self.read_buffer.split().freeze();
        let payload = data.split_off(1);
        tracing::trace!(code = %char::from(data[0]), len = payload.len(), "read packet");
        Ok(Some(Packet {
            code: data[0],
            payload,
        }))
    }

    /// Writes one response packet.
    pub async fn write_response(&mut self, response: &Response) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.put_u32(0);
        self.write_buffer.put_u8(response.code());
        response.encode_payload(&mut self.write_buffer);

        let len = u32::try_from(self.write_buffer.len() - 4)
            .map_err(|_| Error::PacketTooLarge(self.write_buffer.len()))?;
        self.write_buffer[..4].copy_from_slice(&len.to_be_bytes());

        tracing::trace!(code = %char::from(response.code()), len, "write packet");
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use spamgate_core::{Rejection, Verdict};

    #[tokio::test]
    async fn test_read_packet() {
        use tokio_test::io::Builder;

        let mock = Builder::new()
            .read(&[0, 0, 0, 8])
            .read(b"LSubj\0x\0")
            .build();
        let mut framed = FramedStream::new(mock);

        let packet = framed.read_packet().await.unwrap().unwrap();
        assert_eq!(packet.code, b'L');
        assert_eq!(&packet.payload[..], b"Subj\0x\0");
        assert!(framed.read_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_packet_split_reads() {
        use tokio_test::io::Builder;

        let mock = Builder::new()
            .read(&[0, 0])
            .read(&[0, 3, b'B'])
            .read(b"h")
            .read(b"i")
            .build();
        let mut framed = FramedStream::new(mock);

        let packet = framed.read_packet().await.unwrap().unwrap();
        assert_eq!(packet.code, b'B');
        assert_eq!(&packet.payload[..], b"hi");
    }

    #[tokio::test]
    async fn test_packet_size_validation() {
        use tokio_test::io::Builder;

        let len = u32::try_from(MAX_PACKET_SIZE + 1).unwrap();
        let mock = Builder::new().read(&len.to_be_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_packet().await.unwrap_err();
        assert!(matches!(err, Error::PacketTooLarge(_)));
    }

    #[tokio::test]
    async fn test_zero_length_packet() {
        use tokio_test::io::Builder;

        let mock = Builder::new().read(&[0, 0, 0, 0]).build();
        let mut framed = FramedStream::new(mock);
        assert!(framed.read_packet().await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_packet() {
        use tokio_test::io::Builder;

        let mock = Builder::new().read(&[0, 0, 0, 9]).read(b"Bshort").build();
        let mut framed = FramedStream::new(mock);
        let err = framed.read_packet().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_write_continue() {
        use tokio_test::io::Builder;

        let mock = Builder::new().write(&[0, 0, 0, 1, b'c']).build();
        let mut framed = FramedStream::new(mock);
        framed.write_response(&Response::Continue).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_reply_code() {
        use tokio_test::io::Builder;

        let text = b"550 5.7.1 Blocked by SpamAssassin\0";
        let mut expected = u32::try_from(text.len() + 1).unwrap().to_be_bytes().to_vec();
        expected.push(b'y');
        expected.extend_from_slice(text);

        let mock = Builder::new().write(&expected).build();
        let mut framed = FramedStream::new(mock);
        framed
            .write_response(&Response::from_verdict(Verdict::Reject(Rejection::BLOCKED)))
            .await
            .unwrap();
    }
}
