use thiserror::Error;

/// Errors raised while parsing or building packets
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet truncated: {0} bytes")]
    Truncated(usize),

    #[error("Unsupported IP version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid header length: {0}")]
    BadHeaderLength(usize),

    #[error("Invalid packet length: {0}")]
    BadLength(usize),

    #[error("Not a UDP packet: protocol {0}")]
    NotUdp(u8),

    #[error("Source and destination address families differ")]
    AddressFamilyMismatch,

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

pub type PacketResult<T> = Result<T, PacketError>;
