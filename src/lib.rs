//! tunmux - many logical connections over one bidirectional stream
//!
//! The workspace is split by layer; this crate re-exports them:
//!
//! - [`proto`]: connection ids, messages and the frame codec
//! - [`transport`]: the stream contract and its in-memory/framed implementations
//! - [`connpool`]: the flow-controlled [`Tunnel`] and the handler [`Pool`]
//! - [`udp`]: UDP flows between a TUN device and the tunnel
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use tunmux::transport::FramedStream;
//! use tunmux::{Pool, Tunnel};
//! use tunmux::udp::{Datagram, DatagramRouter};
//!
//! # async fn run(io: tokio::net::TcpStream, packet: &[u8]) -> anyhow::Result<()> {
//! tunmux::logging::init(None)?;
//!
//! let ctx = CancellationToken::new();
//! let tunnel = Arc::new(Tunnel::with_half_close(FramedStream::new(io)));
//! let (to_tun, _from_tunnel) = tokio::sync::mpsc::channel(64);
//! let router = DatagramRouter::new(Pool::new(), tunnel, to_tun);
//!
//! router.route(&ctx, Datagram::parse(packet)?).await?;
//! # Ok(())
//! # }
//! ```

pub mod logging;

pub use tunmux_connpool as connpool;
pub use tunmux_proto as proto;
pub use tunmux_transport as transport;
pub use tunmux_udp as udp;

pub use tunmux_connpool::{Dialer, Handler, Pool, Release, Tunnel, TunnelConfig, TunnelError};
pub use tunmux_proto::{ConnId, Control, ControlCode, IpProtocol, Message};
