//! Tunnel Protocol Definitions
//!
//! This crate defines the wire model shared by both ends of a multiplexed
//! tunnel: connection identities, data and control messages, and the codec
//! that turns them into frames for the underlying bidirectional stream.

pub mod codec;
pub mod conn_id;
pub mod messages;

pub use codec::{CodecError, TunnelCodec};
pub use conn_id::{ConnId, IpProtocol};
pub use messages::{Control, ControlCode, Message};

/// Maximum encoded message size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
