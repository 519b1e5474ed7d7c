//! Error types for the tunnel and connection pool

use thiserror::Error;
use tunmux_proto::{CodecError, ConnId};
use tunmux_transport::TransportError;

/// Tunnel errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("write to stream failed: {0}")]
    Send(#[source] TransportError),

    #[error("read from stream failed: {0}")]
    Recv(#[source] TransportError),

    #[error("failed to send sync response: {0}")]
    SyncResponse(#[source] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("tunnel does not support CloseSend")]
    CloseSendUnsupported,

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl TunnelError {
    /// Cancellation is a clean shutdown, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TunnelError::Cancelled)
    }
}

/// Pool errors
///
/// Cloned to every caller that awaited the same construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("failed to create handler for {id}: {reason}")]
    HandlerCreation { id: ConnId, reason: String },
}

/// Result type for tunnel operations
pub type TunnelResult<T> = Result<T, TunnelError>;
