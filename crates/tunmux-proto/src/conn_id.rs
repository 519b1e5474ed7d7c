//! Connection identity used as the multiplexing key

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

/// Transport protocol of a multiplexed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpProtocol {
    Tcp,
    Udp,
    Other(u8),
}

impl IpProtocol {
    /// IANA protocol number, as carried in the IP header
    pub fn number(&self) -> u8 {
        match self {
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Other(n) => *n,
        }
    }
}

impl From<u8> for IpProtocol {
    fn from(value: u8) -> Self {
        match value {
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            n => IpProtocol::Other(n),
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProtocol::Tcp => f.write_str("tcp"),
            IpProtocol::Udp => f.write_str("udp"),
            IpProtocol::Other(n) => write!(f, "proto-{}", n),
        }
    }
}

/// Identity of one logical connection: protocol plus both endpoints.
///
/// `source` is the side that originated the flow. Replies travel from
/// `destination` back to `source`, which is what [`ConnId::reply_string`]
/// renders for log lines written on the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId {
    protocol: IpProtocol,
    source: SocketAddr,
    destination: SocketAddr,
}

impl ConnId {
    /// Id used by messages that do not belong to any connection
    pub const UNSPECIFIED: ConnId = ConnId {
        protocol: IpProtocol::Other(0),
        source: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
        destination: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
    };

    pub fn new(protocol: IpProtocol, source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            protocol,
            source,
            destination,
        }
    }

    pub fn protocol(&self) -> IpProtocol {
        self.protocol
    }

    pub fn source(&self) -> IpAddr {
        self.source.ip()
    }

    pub fn destination(&self) -> IpAddr {
        self.destination.ip()
    }

    pub fn source_port(&self) -> u16 {
        self.source.port()
    }

    pub fn destination_port(&self) -> u16 {
        self.destination.port()
    }

    pub fn source_addr(&self) -> SocketAddr {
        self.source
    }

    pub fn destination_addr(&self) -> SocketAddr {
        self.destination
    }

    /// The identity as seen from the other end of the flow
    pub fn reply(&self) -> Self {
        Self {
            protocol: self.protocol,
            source: self.destination,
            destination: self.source,
        }
    }

    /// Human readable form with source and destination swapped
    pub fn reply_string(&self) -> String {
        self.reply().to_string()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.protocol, self.source, self.destination
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn udp_id() -> ConnId {
        ConnId::new(
            IpProtocol::Udp,
            "10.0.0.1:5000".parse().unwrap(),
            "10.0.0.2:53".parse().unwrap(),
        )
    }

    #[test]
    fn test_display_and_reply_string() {
        let id = udp_id();
        assert_eq!(id.to_string(), "udp 10.0.0.1:5000 -> 10.0.0.2:53");
        assert_eq!(id.reply_string(), "udp 10.0.0.2:53 -> 10.0.0.1:5000");
    }

    #[test]
    fn test_accessors() {
        let id = udp_id();
        assert_eq!(id.protocol(), IpProtocol::Udp);
        assert_eq!(id.source(), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(id.destination(), "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(id.source_port(), 5000);
        assert_eq!(id.destination_port(), 53);
    }

    #[test]
    fn test_reply_is_involution() {
        let id = udp_id();
        assert_ne!(id.reply(), id);
        assert_eq!(id.reply().reply(), id);
    }

    #[test]
    fn test_usable_as_map_key() {
        let mut set = HashSet::new();
        set.insert(udp_id());
        set.insert(udp_id());
        set.insert(udp_id().reply());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_ipv6_display() {
        let id = ConnId::new(
            IpProtocol::Tcp,
            "[fd00::1]:4000".parse().unwrap(),
            "[fd00::2]:80".parse().unwrap(),
        );
        assert_eq!(id.to_string(), "tcp [fd00::1]:4000 -> [fd00::2]:80");
    }

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(IpProtocol::from(17), IpProtocol::Udp);
        assert_eq!(IpProtocol::from(6), IpProtocol::Tcp);
        assert_eq!(IpProtocol::from(1), IpProtocol::Other(1));
        assert_eq!(IpProtocol::Other(1).number(), 1);
        assert_eq!(IpProtocol::Udp.number(), 17);
    }
}
