use crate::error::{PacketError, PacketResult};
use crate::ip::{self, IpHeader, PROTOCOL_UDP};
use crate::udp::{UdpHeader, UDP_HEADER_LEN};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;
use tunmux_proto::{ConnId, IpProtocol};

/// An owned IP packet whose payload is a UDP datagram.
///
/// Construction validates both headers, so the accessors never fail.
/// Mutating headers through the `_mut` views must keep the length fields
/// consistent.
#[derive(Clone, PartialEq, Eq)]
pub struct Datagram {
    buf: BytesMut,
}

impl Datagram {
    /// Parses a packet read from the TUN device. Bytes past the IP
    /// length field are dropped.
    pub fn parse(packet: &[u8]) -> PacketResult<Self> {
        let header = IpHeader::new_checked(packet)?;
        if header.protocol() != PROTOCOL_UDP {
            return Err(PacketError::NotUdp(header.protocol()));
        }
        UdpHeader::new_checked(header.payload())?;
        Ok(Self {
            buf: BytesMut::from(&packet[..header.packet_len()]),
        })
    }

    /// Builds a datagram from `src` to `dst` carrying `payload`, with
    /// lengths and checksums filled in.
    pub fn build(src: SocketAddr, dst: SocketAddr, payload: &[u8]) -> PacketResult<Self> {
        let mut dg = Self::new(src, dst, payload.len())?;
        dg.ip_header_mut().set_checksum();

        let mut udp = dg.udp_header_mut();
        udp.set_source_port(src.port());
        udp.set_destination_port(dst.port());
        udp.payload_mut().copy_from_slice(payload);
        dg.set_udp_checksum();
        Ok(dg)
    }

    /// Allocates a zeroed datagram with a valid IP header and UDP length.
    /// Ports, payload and checksums are left to the caller.
    pub fn new(src: SocketAddr, dst: SocketAddr, payload_len: usize) -> PacketResult<Self> {
        let total = ip::header_len_for(src.ip()) + UDP_HEADER_LEN + payload_len;
        let mut buf = BytesMut::zeroed(total);
        ip::write_header(&mut buf, src.ip(), dst.ip(), PROTOCOL_UDP).map_err(|err| match err {
            PacketError::PayloadTooLarge(_) => PacketError::PayloadTooLarge(payload_len),
            other => other,
        })?;

        let mut dg = Self { buf };
        dg.udp_header_mut().set_payload_len(payload_len)?;
        Ok(dg)
    }

    pub fn ip_header(&self) -> IpHeader<&[u8]> {
        IpHeader::new_unchecked(&self.buf[..])
    }

    pub fn ip_header_mut(&mut self) -> IpHeader<&mut [u8]> {
        IpHeader::new_unchecked(&mut self.buf[..])
    }

    fn udp_range(&self) -> (usize, usize) {
        let header = self.ip_header();
        (header.header_len(), header.packet_len())
    }

    pub fn udp_header(&self) -> UdpHeader<&[u8]> {
        let (start, end) = self.udp_range();
        UdpHeader::new_unchecked(&self.buf[start..end])
    }

    pub fn udp_header_mut(&mut self) -> UdpHeader<&mut [u8]> {
        let (start, end) = self.udp_range();
        UdpHeader::new_unchecked(&mut self.buf[start..end])
    }

    /// Recomputes the UDP checksum from the current IP header
    pub fn set_udp_checksum(&mut self) {
        let pseudo = self.ip_header().pseudo_header_sum();
        self.udp_header_mut().set_checksum(pseudo);
    }

    pub fn verify_checksums(&self) -> bool {
        let ip = self.ip_header();
        ip.verify_checksum() && self.udp_header().verify_checksum(ip.pseudo_header_sum())
    }

    pub fn source(&self) -> SocketAddr {
        SocketAddr::new(self.ip_header().source(), self.udp_header().source_port())
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(
            self.ip_header().destination(),
            self.udp_header().destination_port(),
        )
    }

    pub fn payload(&self) -> &[u8] {
        let (start, _) = self.udp_range();
        let length = self.udp_header().length();
        &self.buf[start + UDP_HEADER_LEN..start + length]
    }

    /// Identity of the flow this datagram belongs to
    pub fn conn_id(&self) -> ConnId {
        ConnId::new(IpProtocol::Udp, self.source(), self.destination())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl fmt::Display for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "udp {} -> {}, len {}",
            self.source(),
            self.destination(),
            self.payload().len()
        )
    }
}

impl fmt::Debug for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Datagram({})", self)
    }
}
