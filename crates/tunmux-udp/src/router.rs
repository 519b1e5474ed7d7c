use crate::config::UdpConfig;
use crate::datagram::Datagram;
use crate::handler::UdpHandler;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tunmux_connpool::{Handler, Pool, Tunnel, TunnelError, TunnelResult};
use tunmux_proto::ConnId;

/// Dispatches datagrams read from the TUN device to per-flow handlers,
/// creating and starting a [`UdpHandler`] the first time a flow is seen.
#[derive(Debug, Clone)]
pub struct DatagramRouter {
    pool: Pool,
    tunnel: Arc<Tunnel>,
    to_tun: mpsc::Sender<Bytes>,
    config: UdpConfig,
}

impl DatagramRouter {
    pub fn new(pool: Pool, tunnel: Arc<Tunnel>, to_tun: mpsc::Sender<Bytes>) -> Self {
        Self {
            pool,
            tunnel,
            to_tun,
            config: UdpConfig::default(),
        }
    }

    pub fn with_config(mut self, config: UdpConfig) -> TunnelResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Hand `dg` to the handler of its flow. Flows created here are bound
    /// to `ctx`.
    ///
    /// A handler that closed after the lookup is released and replaced once.
    pub async fn route(&self, ctx: &CancellationToken, mut dg: Datagram) -> TunnelResult<()> {
        let id = dg.conn_id();
        for _ in 0..2 {
            let handler = self.handler(ctx, id).await?;
            match handler.new_datagram(ctx, dg).await {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    handler.close(ctx).await;
                    dg = returned;
                }
            }
        }
        debug!("Dropping {}, flow keeps closing", dg);
        Ok(())
    }

    pub(crate) async fn handler(
        &self,
        ctx: &CancellationToken,
        id: ConnId,
    ) -> TunnelResult<Arc<UdpHandler>> {
        let tunnel = self.tunnel.clone();
        let to_tun = self.to_tun.clone();
        let config = self.config.clone();

        let (handler, created) = self
            .pool
            .get_or_create(ctx, id, move |ctx, release| async move {
                let handler = UdpHandler::new(tunnel, to_tun, id, release, &config);
                handler.start(&ctx);
                Ok::<_, TunnelError>(handler as Arc<dyn Handler>)
            })
            .await?;
        if created {
            debug!("New UDP flow {}", id);
        }

        handler
            .into_any()
            .downcast::<UdpHandler>()
            .map_err(|_| TunnelError::Handler(format!("handler for {} is not a UDP handler", id)))
    }
}
