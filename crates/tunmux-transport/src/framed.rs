//! Length-delimited frames over a byte stream

use crate::{BidiStream, HalfCloseStream, TransportError, TransportResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::trace;
use tunmux_proto::MAX_MESSAGE_SIZE;

/// Message stream over any duplex byte stream (TCP, TLS, unix socket, ...)
///
/// Every frame is prefixed with its length. Reads and writes are guarded
/// separately so a pending `recv` never blocks a `send`.
pub struct FramedStream<T> {
    reader: Mutex<FramedRead<ReadHalf<T>, LengthDelimitedCodec>>,
    writer: Mutex<FramedWrite<WriteHalf<T>, LengthDelimitedCodec>>,
}

impl<T> FramedStream<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(io: T) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            reader: Mutex::new(FramedRead::new(read_half, Self::codec())),
            writer: Mutex::new(FramedWrite::new(write_half, Self::codec())),
        }
    }

    fn codec() -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .max_frame_length(MAX_MESSAGE_SIZE)
            .new_codec()
    }
}

impl<T> fmt::Debug for FramedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedStream").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> BidiStream for FramedStream<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        trace!("Writing frame of {} bytes", frame.len());
        self.writer.lock().await.send(frame).await?;
        Ok(())
    }

    async fn recv(&self) -> TransportResult<Bytes> {
        match self.reader.lock().await.next().await {
            Some(Ok(frame)) => Ok(frame.freeze()),
            Some(Err(e)) => Err(TransportError::IoError(e)),
            None => Err(TransportError::StreamClosed),
        }
    }
}

#[async_trait]
impl<T> HalfCloseStream for FramedStream<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn close_send(&self) -> TransportResult<()> {
        SinkExt::<Bytes>::close(&mut *self.writer.lock().await).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_survive_byte_stream() {
        let (left, right) = tokio::io::duplex(1024);
        let a = FramedStream::new(left);
        let b = FramedStream::new(right);

        a.send(Bytes::from_static(b"first")).await.unwrap();
        a.send(Bytes::from(vec![7u8; 200])).await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"first"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from(vec![7u8; 200]));
    }

    #[tokio::test]
    async fn test_close_send_is_eof_for_peer() {
        let (left, right) = tokio::io::duplex(1024);
        let a = FramedStream::new(left);
        let b = FramedStream::new(right);

        a.send(Bytes::from_static(b"bye")).await.unwrap();
        a.close_send().await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"bye"));
        assert!(matches!(b.recv().await, Err(TransportError::StreamClosed)));

        b.send(Bytes::from_static(b"still here")).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"still here"));
    }
}
