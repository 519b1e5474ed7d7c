//! IPv4 and IPv6 header views

use crate::checksum::{compute_checksum, pseudo_header_sum};
use crate::error::{PacketError, PacketResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV6_HEADER_LEN: usize = 40;
pub const PROTOCOL_UDP: u8 = 17;

const DEFAULT_TTL: u8 = 64;

/// A checked view over the IP header at the start of `buf`
#[derive(Debug, Clone, Copy)]
pub struct IpHeader<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> IpHeader<B> {
    /// Validates version and length fields against the buffer
    pub fn new_checked(buf: B) -> PacketResult<Self> {
        let data = buf.as_ref();
        let Some(first) = data.first() else {
            return Err(PacketError::Truncated(0));
        };

        match first >> 4 {
            4 => {
                if data.len() < IPV4_HEADER_LEN {
                    return Err(PacketError::Truncated(data.len()));
                }
                let ihl = ((first & 0x0F) as usize) * 4;
                if ihl < IPV4_HEADER_LEN || ihl > data.len() {
                    return Err(PacketError::BadHeaderLength(ihl));
                }
                let total = u16::from_be_bytes([data[2], data[3]]) as usize;
                if total < ihl || total > data.len() {
                    return Err(PacketError::BadLength(total));
                }
            }
            6 => {
                if data.len() < IPV6_HEADER_LEN {
                    return Err(PacketError::Truncated(data.len()));
                }
                let total = IPV6_HEADER_LEN + u16::from_be_bytes([data[4], data[5]]) as usize;
                if total > data.len() {
                    return Err(PacketError::BadLength(total));
                }
            }
            version => return Err(PacketError::UnsupportedVersion(version)),
        }

        Ok(Self { buf })
    }

    /// Wraps a buffer that already passed [`IpHeader::new_checked`]
    pub(crate) fn new_unchecked(buf: B) -> Self {
        Self { buf }
    }

    fn data(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn version(&self) -> u8 {
        self.data()[0] >> 4
    }

    pub fn header_len(&self) -> usize {
        match self.version() {
            4 => ((self.data()[0] & 0x0F) as usize) * 4,
            _ => IPV6_HEADER_LEN,
        }
    }

    /// Header plus payload, as announced by the length field
    pub fn packet_len(&self) -> usize {
        let data = self.data();
        match self.version() {
            4 => u16::from_be_bytes([data[2], data[3]]) as usize,
            _ => IPV6_HEADER_LEN + u16::from_be_bytes([data[4], data[5]]) as usize,
        }
    }

    /// Protocol (IPv4) or next header (IPv6). Extension headers are not walked.
    pub fn protocol(&self) -> u8 {
        match self.version() {
            4 => self.data()[9],
            _ => self.data()[6],
        }
    }

    pub fn source(&self) -> IpAddr {
        let data = self.data();
        match self.version() {
            4 => IpAddr::V4(Ipv4Addr::new(data[12], data[13], data[14], data[15])),
            _ => IpAddr::V6(Ipv6Addr::from(octets16(&data[8..24]))),
        }
    }

    pub fn destination(&self) -> IpAddr {
        let data = self.data();
        match self.version() {
            4 => IpAddr::V4(Ipv4Addr::new(data[16], data[17], data[18], data[19])),
            _ => IpAddr::V6(Ipv6Addr::from(octets16(&data[24..40]))),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data()[self.header_len()..self.packet_len()]
    }

    pub fn checksum(&self) -> u16 {
        match self.version() {
            4 => u16::from_be_bytes([self.data()[10], self.data()[11]]),
            _ => 0,
        }
    }

    /// IPv6 has no header checksum and always verifies
    pub fn verify_checksum(&self) -> bool {
        match self.version() {
            4 => compute_checksum(&self.data()[..self.header_len()]) == 0,
            _ => true,
        }
    }

    /// Pseudo-header sum for the upper-layer protocol carried in the payload
    pub fn pseudo_header_sum(&self) -> u32 {
        pseudo_header_sum(
            self.source(),
            self.destination(),
            self.protocol(),
            self.payload().len() as u32,
        )
    }

    pub fn into_inner(self) -> B {
        self.buf
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> IpHeader<B> {
    /// Recomputes the IPv4 header checksum. No-op for IPv6.
    pub fn set_checksum(&mut self) {
        if self.version() != 4 {
            return;
        }
        let len = self.header_len();
        let data = self.buf.as_mut();
        data[10..12].fill(0);
        let sum = compute_checksum(&data[..len]);
        data[10..12].copy_from_slice(&sum.to_be_bytes());
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let (start, end) = (self.header_len(), self.packet_len());
        &mut self.buf.as_mut()[start..end]
    }
}

/// Header length used by [`write_header`] for the given source address
pub fn header_len_for(addr: IpAddr) -> usize {
    match addr {
        IpAddr::V4(_) => IPV4_HEADER_LEN,
        IpAddr::V6(_) => IPV6_HEADER_LEN,
    }
}

/// Writes a header without options at the start of `buf`. The whole
/// buffer is taken as the packet. The IPv4 checksum is left at zero.
pub fn write_header(buf: &mut [u8], src: IpAddr, dst: IpAddr, protocol: u8) -> PacketResult<()> {
    let total = buf.len();
    match (src, dst) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            if total < IPV4_HEADER_LEN {
                return Err(PacketError::Truncated(total));
            }
            let total = u16::try_from(total).map_err(|_| PacketError::PayloadTooLarge(total))?;
            let header = &mut buf[..IPV4_HEADER_LEN];
            header.fill(0);
            header[0] = 0x45;
            header[2..4].copy_from_slice(&total.to_be_bytes());
            header[6] = 0x40; // don't fragment
            header[8] = DEFAULT_TTL;
            header[9] = protocol;
            header[12..16].copy_from_slice(&src.octets());
            header[16..20].copy_from_slice(&dst.octets());
        }
        (IpAddr::V6(src), IpAddr::V6(dst)) => {
            if total < IPV6_HEADER_LEN {
                return Err(PacketError::Truncated(total));
            }
            let payload_len = total - IPV6_HEADER_LEN;
            let payload_len =
                u16::try_from(payload_len).map_err(|_| PacketError::PayloadTooLarge(payload_len))?;
            let header = &mut buf[..IPV6_HEADER_LEN];
            header.fill(0);
            header[0] = 0x60;
            header[4..6].copy_from_slice(&payload_len.to_be_bytes());
            header[6] = protocol;
            header[7] = DEFAULT_TTL;
            header[8..24].copy_from_slice(&src.octets());
            header[24..40].copy_from_slice(&dst.octets());
        }
        _ => return Err(PacketError::AddressFamilyMismatch),
    }
    Ok(())
}

fn octets16(slice: &[u8]) -> [u8; 16] {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(slice);
    octets
}
