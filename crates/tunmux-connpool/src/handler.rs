//! Per-connection handler contract

use crate::error::TunnelResult;
use crate::pool::Release;
use crate::tunnel::Tunnel;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tunmux_proto::{ConnId, Message};

/// State machine for one multiplexed connection
///
/// The tunnel and the pool assume nothing about a handler beyond this
/// trait. Each transport protocol supplies its own implementation.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Deliver a message received from the tunnel for this connection
    async fn handle_message(&self, ctx: &CancellationToken, msg: Message);

    /// Tear the handler down. Must be idempotent.
    async fn close(&self, ctx: &CancellationToken);

    /// Recover the concrete handler type from a pooled `dyn Handler`
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Creates the handler for a connection the peer asked to open
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Build a handler for `id` that replies through `tunnel`. `release`
    /// removes the handler from its pool and must be called when it closes.
    async fn dial(
        &self,
        ctx: CancellationToken,
        id: ConnId,
        tunnel: Arc<Tunnel>,
        release: Release,
    ) -> TunnelResult<Arc<dyn Handler>>;
}
