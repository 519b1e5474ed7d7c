//! Transport abstraction layer for the tunnel
//!
//! The tunnel runs on top of one long-lived bidirectional message stream.
//! This crate defines the contract the tunnel needs from that stream and
//! ships two implementations:
//!
//! - [`ChannelStream`]: an in-memory pair, used in tests and for wiring two
//!   tunnels together inside one process
//! - [`FramedStream`]: length-delimited frames over any `AsyncRead + AsyncWrite`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  tunmux-connpool                         │
//! │        (Tunnel, Pool, per-connection handlers)           │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Uses traits
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │            tunmux-transport (this crate)                 │
//! │  - BidiStream           - HalfCloseStream                │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Implemented by
//!                           ↓
//! ┌──────────────┬──────────────┬──────────────────────────┐
//! │ ChannelStream│ FramedStream │  RPC streams, etc.       │
//! └──────────────┴──────────────┴──────────────────────────┘
//! ```

mod channel;
mod framed;

pub use channel::ChannelStream;
pub use framed::FramedStream;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use thiserror::Error;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stream closed")]
    StreamClosed,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A bidirectional, message-oriented stream
///
/// Each `send` delivers exactly one frame to the peer's `recv`, in order.
/// The stream provides no backpressure signal of its own.
#[async_trait]
pub trait BidiStream: Send + Sync + Debug {
    /// Send one frame to the peer
    async fn send(&self, frame: Bytes) -> TransportResult<()>;

    /// Receive the next frame from the peer
    ///
    /// Returns [`TransportError::StreamClosed`] once the peer has closed its
    /// sending side. Implementations must be cancel-safe: dropping the
    /// returned future before completion must not lose a frame.
    async fn recv(&self) -> TransportResult<Bytes>;
}

/// A stream whose sending side can be closed on its own
///
/// After `close_send` the peer observes end of stream while this side can
/// still receive.
#[async_trait]
pub trait HalfCloseStream: BidiStream {
    async fn close_send(&self) -> TransportResult<()>;
}
