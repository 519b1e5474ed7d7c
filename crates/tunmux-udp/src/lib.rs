//! UDP support for the tunnel
//!
//! Bridges datagrams read from a TUN device and tunnel messages:
//!
//! - [`ip`], [`udp`] and [`checksum`]: header views and checksum helpers
//! - [`Datagram`]: an owned IP packet carrying UDP
//! - [`UdpHandler`]: per-flow handler with an idle timeout
//! - [`DatagramRouter`]: finds or creates the handler for each datagram

pub mod checksum;
mod config;
mod datagram;
mod error;
mod handler;
pub mod ip;
mod router;
pub mod udp;

pub use config::UdpConfig;
pub use datagram::Datagram;
pub use error::{PacketError, PacketResult};
pub use handler::UdpHandler;
pub use router::DatagramRouter;
