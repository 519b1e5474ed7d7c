//! In-memory stream pair

use crate::{BidiStream, HalfCloseStream, TransportError, TransportResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One end of an in-memory duplex built from two bounded channels
#[derive(Debug)]
pub struct ChannelStream {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
}

impl ChannelStream {
    /// Create two connected ends. Each direction buffers up to `capacity`
    /// frames before `send` waits.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: mpsc::Sender<Bytes>, rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn sender(&self) -> TransportResult<mpsc::Sender<Bytes>> {
        self.tx
            .lock()
            .map_err(|_| TransportError::ConnectionError("sender lock poisoned".to_string()))?
            .clone()
            .ok_or(TransportError::StreamClosed)
    }
}

#[async_trait]
impl BidiStream for ChannelStream {
    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        self.sender()?
            .send(frame)
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    async fn recv(&self) -> TransportResult<Bytes> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::StreamClosed)
    }
}

#[async_trait]
impl HalfCloseStream for ChannelStream {
    async fn close_send(&self) -> TransportResult<()> {
        self.tx
            .lock()
            .map_err(|_| TransportError::ConnectionError("sender lock poisoned".to_string()))?
            .take();
        Ok(())
    }
}
