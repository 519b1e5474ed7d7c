use crate::config::UdpConfig;
use crate::datagram::Datagram;
use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use tunmux_connpool::{Handler, Release, Tunnel};
use tunmux_proto::{ConnId, ControlCode, Message};

/// Handler for one UDP flow seen on the TUN device.
///
/// Datagrams from the device are queued with [`UdpHandler::new_datagram`]
/// and forwarded over the tunnel by a write loop. Replies from the tunnel
/// are turned back into IP packets and pushed to the device. The flow
/// closes after `idle_timeout` without traffic from the device.
pub struct UdpHandler {
    id: ConnId,
    tunnel: Arc<Tunnel>,
    release: Release,
    to_tun: mpsc::Sender<Bytes>,
    from_tun: mpsc::Sender<Datagram>,
    from_tun_rx: Mutex<Option<mpsc::Receiver<Datagram>>>,
    idle: IdleTimer,
    closed: CancellationToken,
}

impl UdpHandler {
    pub fn new(
        tunnel: Arc<Tunnel>,
        to_tun: mpsc::Sender<Bytes>,
        id: ConnId,
        release: Release,
        config: &UdpConfig,
    ) -> Arc<Self> {
        let (from_tun, from_tun_rx) = mpsc::channel(config.queue_size);
        Arc::new(Self {
            id,
            tunnel,
            release,
            to_tun,
            from_tun,
            from_tun_rx: Mutex::new(Some(from_tun_rx)),
            idle: IdleTimer::new(config.idle_timeout),
            closed: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Arms the idle timer and spawns the write loop. Later calls are no-ops.
    pub fn start(self: &Arc<Self>, ctx: &CancellationToken) {
        let Some(rx) = lock(&self.from_tun_rx).take() else {
            return;
        };
        self.idle.arm();
        tokio::spawn(self.clone().write_loop(ctx.clone(), rx));
    }

    /// Queues a datagram read from the TUN device. Waits while the queue is
    /// full, unless `ctx` is cancelled first.
    ///
    /// Hands the datagram back when the write loop is gone.
    pub async fn new_datagram(
        &self,
        ctx: &CancellationToken,
        dg: Datagram,
    ) -> Result<(), Datagram> {
        if self.is_closed() {
            return Err(dg);
        }
        tokio::select! {
            _ = ctx.cancelled() => Ok(()),
            sent = self.from_tun.send(dg) => sent.map_err(|err| err.0),
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        ctx: CancellationToken,
        mut from_tun: mpsc::Receiver<Datagram>,
    ) {
        loop {
            let deadline = self.idle.deadline();
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = self.closed.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {
                    if self.idle.expire() {
                        debug!("{} idle for {:?}, closing", self.id, self.idle.duration);
                        break;
                    }
                }
                dg = from_tun.recv() => {
                    let Some(dg) = dg else { break };
                    if !self.idle.reset() {
                        break;
                    }
                    debug!("<- TUN {}", dg);
                    debug!("-> MGR {}", dg);
                    let msg = Message::data(self.id, Bytes::copy_from_slice(dg.payload()));
                    drop(dg);
                    if let Err(err) = self.tunnel.send(&ctx, msg).await {
                        if !ctx.is_cancelled() && !err.is_cancelled() {
                            error!("failed to send message for {}: {}", self.id, err);
                        }
                        break;
                    }
                }
            }
        }
        self.close(&ctx).await;
    }

    async fn reply(&self, ctx: &CancellationToken, payload: &[u8]) {
        let dg = match Datagram::build(self.id.destination_addr(), self.id.source_addr(), payload) {
            Ok(dg) => dg,
            Err(err) => {
                error!("failed to build reply for {}: {}", self.id.reply_string(), err);
                return;
            }
        };
        debug!("<- MGR {}", dg);
        debug!("-> TUN {}", dg);
        tokio::select! {
            _ = ctx.cancelled() => {}
            result = self.to_tun.send(dg.into_bytes()) => {
                if result.is_err() {
                    debug!("TUN writer gone, dropping reply for {}", self.id);
                }
            }
        }
    }
}

#[async_trait]
impl Handler for UdpHandler {
    async fn handle_message(&self, ctx: &CancellationToken, msg: Message) {
        match msg {
            Message::Data { payload, .. } => self.reply(ctx, &payload).await,
            Message::Control(ctrl) => match ctrl.code() {
                ControlCode::Disconnect => self.close(ctx).await,
                code => debug!("{}: ignoring control {}", self.id, code),
            },
        }
    }

    async fn close(&self, _ctx: &CancellationToken) {
        self.closed.cancel();
        self.release.release();
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl std::fmt::Debug for UdpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpHandler")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct IdleState {
    deadline: Instant,
    fired: bool,
}

/// Resettable deadline. Once it has fired it stays fired.
struct IdleTimer {
    duration: Duration,
    state: Mutex<IdleState>,
}

impl IdleTimer {
    fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: Mutex::new(IdleState {
                deadline: Instant::now() + duration,
                fired: false,
            }),
        }
    }

    fn arm(&self) {
        let mut state = lock(&self.state);
        state.deadline = Instant::now() + self.duration;
        state.fired = false;
    }

    fn deadline(&self) -> Instant {
        lock(&self.state).deadline
    }

    /// Checks the deadline after a wakeup. A reset in between wins.
    fn expire(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.fired && Instant::now() >= state.deadline {
            state.fired = true;
        }
        state.fired
    }

    /// Pushes the deadline out. Fails if the timer already fired.
    fn reset(&self) -> bool {
        let mut state = lock(&self.state);
        let now = Instant::now();
        if state.fired || now >= state.deadline {
            state.fired = true;
            return false;
        }
        state.deadline = now + self.duration;
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
