//! Connection pool and flow-controlled tunnel
//!
//! A [`Tunnel`] multiplexes many logical connections over one bidirectional
//! stream and throttles itself with a sync/ack window, since the stream has
//! no backpressure of its own. Incoming traffic is demultiplexed by
//! [`ConnId`](tunmux_proto::ConnId) into a [`Pool`] of per-connection
//! [`Handler`]s.
//!
//! ```text
//!  handler ──Send──▶ Tunnel ──frame──▶ stream ──▶ peer
//!                      │
//!  stream ──frame──▶ ReadLoop ──▶ DialLoop ──Pool lookup──▶ handler
//! ```

mod config;
mod error;
mod handler;
mod pool;
mod tunnel;

pub use config::TunnelConfig;
pub use error::{PoolError, TunnelError, TunnelResult};
pub use handler::{Dialer, Handler};
pub use pool::{Pool, Release};
pub use tunnel::Tunnel;
