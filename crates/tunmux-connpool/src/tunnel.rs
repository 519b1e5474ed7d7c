//! Flow-controlled tunnel over one bidirectional stream
//!
//! Flow control is invisible to callers. Every `sync_ratio` data messages,
//! [`Tunnel::send`] emits a `SyncRequest` carrying `counter / sync_ratio`
//! and waits until the peer's last `SyncResponse` is within `ack_window`
//! of it. Ack numbers are the low 32 bits of that quotient and are compared
//! with serial number arithmetic (RFC 1982), so they may wrap.
//! [`Tunnel::receive`] answers the peer's requests and absorbs its
//! responses, so neither kind ever reaches a caller.

use crate::config::TunnelConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::handler::Dialer;
use crate::pool::Pool;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};
use tunmux_proto::{Control, ControlCode, Message, TunnelCodec};
use tunmux_transport::{BidiStream, HalfCloseStream};

pub struct Tunnel {
    stream: Arc<dyn BidiStream>,
    /// Same stream as `stream`, present only when it can half-close
    half_close: Option<Arc<dyn HalfCloseStream>>,
    /// Data messages sent so far
    counter: AtomicU64,
    /// Last ack number received from the peer
    last_ack: AtomicU32,
    /// Set by `close_send`; sync waits no longer block
    released: AtomicBool,
    config: TunnelConfig,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("stream", &self.stream)
            .field("half_close", &self.half_close.is_some())
            .field("counter", &self.counter.load(Ordering::Relaxed))
            .field("last_ack", &self.last_ack.load(Ordering::Relaxed))
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

impl Tunnel {
    /// Wrap a stream that cannot half-close. `close_send` will fail.
    pub fn new<S: BidiStream + 'static>(stream: S) -> Self {
        Self::from_parts(Arc::new(stream), None)
    }

    /// Wrap a stream whose sending side can be closed separately
    pub fn with_half_close<S: HalfCloseStream + 'static>(stream: S) -> Self {
        let stream = Arc::new(stream);
        Self::from_parts(stream.clone(), Some(stream as Arc<dyn HalfCloseStream>))
    }

    fn from_parts(
        stream: Arc<dyn BidiStream>,
        half_close: Option<Arc<dyn HalfCloseStream>>,
    ) -> Self {
        Self {
            stream,
            half_close,
            counter: AtomicU64::new(0),
            last_ack: AtomicU32::new(0),
            released: AtomicBool::new(false),
            config: TunnelConfig::default(),
        }
    }

    /// Replace the default flow-control parameters
    pub fn with_config(mut self, config: TunnelConfig) -> TunnelResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Number of data messages sent so far
    pub fn sent_count(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Last ack number received from the peer
    pub fn last_ack(&self) -> u32 {
        self.last_ack.load(Ordering::Acquire)
    }

    /// Whether `close_send` has switched flow control off
    pub fn is_send_closed(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Send a message. Every `sync_ratio`th data message also runs the sync
    /// handshake before returning.
    pub async fn send(&self, ctx: &CancellationToken, msg: Message) -> TunnelResult<()> {
        self.write(ctx, &msg).await?;

        if !msg.is_control() {
            let count = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
            let ratio = u64::from(self.config.sync_ratio);
            if count % ratio == 0 {
                return self.sync(ctx, (count / ratio) as u32).await;
            }
        }
        Ok(())
    }

    async fn write(&self, ctx: &CancellationToken, msg: &Message) -> TunnelResult<()> {
        let frame = TunnelCodec::encode(msg)?;
        tokio::select! {
            _ = ctx.cancelled() => Err(TunnelError::Cancelled),
            result = self.stream.send(frame) => result.map_err(TunnelError::Send),
        }
    }

    async fn sync(&self, ctx: &CancellationToken, ack_sent: u32) -> TunnelResult<()> {
        self.write(ctx, &Control::sync_request(ack_sent).into()).await?;

        while !ctx.is_cancelled() {
            let last_ack = self.last_ack.load(Ordering::Acquire);
            if self.is_send_closed() || within_window(ack_sent, last_ack, self.config.ack_window) {
                debug!("Received Ack of {}", ack_sent);
                break;
            }
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.config.ack_poll_interval) => {}
            }
        }
        Ok(())
    }

    /// Receive the next message that is not a sync request or response
    pub async fn receive(&self, ctx: &CancellationToken) -> TunnelResult<Message> {
        loop {
            if ctx.is_cancelled() {
                return Err(TunnelError::Cancelled);
            }
            let frame = tokio::select! {
                _ = ctx.cancelled() => return Err(TunnelError::Cancelled),
                frame = self.stream.recv() => frame.map_err(TunnelError::Recv)?,
            };
            let msg = TunnelCodec::decode(&frame)?;

            if let Message::Control(ctrl) = &msg {
                match ctrl.code() {
                    ControlCode::SyncRequest { ack } => {
                        trace!("Answering sync request {}", ack);
                        let frame = TunnelCodec::encode(&Control::sync_response(ack).into())?;
                        tokio::select! {
                            _ = ctx.cancelled() => return Err(TunnelError::Cancelled),
                            sent = self.stream.send(frame) => {
                                sent.map_err(TunnelError::SyncResponse)?
                            }
                        }
                        continue;
                    }
                    ControlCode::SyncResponse { ack } => {
                        let _ = self.last_ack.fetch_update(
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            |last| serial_after(ack, last).then_some(ack),
                        );
                        continue;
                    }
                    _ => {}
                }
            }
            return Ok(msg);
        }
    }

    /// Close the sending side of the stream.
    ///
    /// Any send blocked in a sync wait returns immediately afterwards: flow
    /// control is off once the peer can no longer be reached.
    pub async fn close_send(&self) -> TunnelResult<()> {
        match &self.half_close {
            Some(stream) => {
                self.released.store(true, Ordering::Release);
                stream.close_send().await.map_err(TunnelError::Send)
            }
            None => Err(TunnelError::CloseSendUnsupported),
        }
    }

    /// Spawn a task that receives messages until the context is cancelled or
    /// a read fails.
    ///
    /// Messages arrive on the first channel. The first failure that is not a
    /// cancellation is reported once on the second channel. Both channels
    /// close when the task ends.
    pub fn read_loop(
        self: &Arc<Self>,
        ctx: &CancellationToken,
    ) -> (mpsc::Receiver<Message>, mpsc::Receiver<TunnelError>) {
        let (msg_tx, msg_rx) = mpsc::channel(self.config.read_buffer);
        let (err_tx, err_rx) = mpsc::channel(1);
        let tunnel = self.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            while !ctx.is_cancelled() {
                match tunnel.receive(&ctx).await {
                    Ok(msg) => {
                        tokio::select! {
                            _ = ctx.cancelled() => break,
                            sent = msg_tx.send(msg) => if sent.is_err() { break },
                        }
                    }
                    Err(err) => {
                        if !ctx.is_cancelled() && !err.is_cancelled() {
                            let _ = err_tx.send(err).await;
                        }
                        break;
                    }
                }
            }
            debug!("Read loop ended");
        });

        (msg_rx, err_rx)
    }

    /// Demultiplex incoming traffic into the pool until the context is
    /// cancelled or the stream fails.
    ///
    /// `Connect` controls create handlers through `dialer`. Data for a
    /// connection with no handler is dropped, since the local side may
    /// already have torn it down.
    pub async fn dial_loop(
        self: &Arc<Self>,
        ctx: &CancellationToken,
        pool: &Pool,
        dialer: Arc<dyn Dialer>,
    ) -> TunnelResult<()> {
        let (mut messages, mut errors) = self.read_loop(ctx);
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),
                Some(err) = errors.recv() => return Err(err),
                msg = messages.recv() => {
                    let Some(msg) = msg else {
                        return Ok(());
                    };
                    match msg {
                        Message::Control(ctrl) => {
                            self.handle_control(ctx, ctrl, pool, &dialer).await
                        }
                        msg @ Message::Data { .. } => {
                            let id = msg.id();
                            debug!("<- MGR {}, len {}", id.reply_string(), msg.payload().len());
                            if let Some(handler) = pool.get(&id) {
                                handler.handle_message(ctx, msg).await;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_control(
        self: &Arc<Self>,
        ctx: &CancellationToken,
        ctrl: Control,
        pool: &Pool,
        dialer: &Arc<dyn Dialer>,
    ) {
        let id = ctrl.id();
        let code = ctrl.code();
        debug!("<- MGR {}, code {}", id.reply_string(), code);

        match code {
            ControlCode::Connect => {
                let tunnel = self.clone();
                let dialer = dialer.clone();
                let created = pool
                    .get_or_create(ctx, id, move |ctx, release| async move {
                        dialer.dial(ctx, id, tunnel, release).await
                    })
                    .await;
                match created {
                    Ok((handler, _)) => handler.handle_message(ctx, ctrl.into()).await,
                    Err(err) => error!("{}", err),
                }
            }
            _ => match pool.get(&id) {
                Some(handler) => handler.handle_message(ctx, ctrl.into()).await,
                // Disconnects routinely race with a teardown that already happened
                None if matches!(code, ControlCode::Disconnect | ControlCode::DisconnectOk) => {}
                None => error!(
                    "control packet {} for {} lost because no connection was active",
                    code,
                    id.reply_string()
                ),
            },
        }
    }
}

/// `a` is later than `b` in RFC 1982 serial number order
fn serial_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// The sender may proceed while `ack_sent` leads `last_ack` by at most `window`
fn within_window(ack_sent: u32, last_ack: u32, window: u32) -> bool {
    i64::from(ack_sent.wrapping_sub(last_ack) as i32) <= i64::from(window)
}
