//! UDP header view

use crate::checksum::checksum_with;
use crate::error::{PacketError, PacketResult};

pub const UDP_HEADER_LEN: usize = 8;

/// A checked view over a UDP header and its payload
#[derive(Debug, Clone, Copy)]
pub struct UdpHeader<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> UdpHeader<B> {
    pub fn new_checked(buf: B) -> PacketResult<Self> {
        let data = buf.as_ref();
        if data.len() < UDP_HEADER_LEN {
            return Err(PacketError::Truncated(data.len()));
        }
        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        if length < UDP_HEADER_LEN || length > data.len() {
            return Err(PacketError::BadLength(length));
        }
        Ok(Self { buf })
    }

    pub(crate) fn new_unchecked(buf: B) -> Self {
        Self { buf }
    }

    fn data(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn source_port(&self) -> u16 {
        u16::from_be_bytes([self.data()[0], self.data()[1]])
    }

    pub fn destination_port(&self) -> u16 {
        u16::from_be_bytes([self.data()[2], self.data()[3]])
    }

    /// Header plus payload
    pub fn length(&self) -> usize {
        u16::from_be_bytes([self.data()[4], self.data()[5]]) as usize
    }

    pub fn payload_len(&self) -> usize {
        self.length() - UDP_HEADER_LEN
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.data()[6], self.data()[7]])
    }

    pub fn payload(&self) -> &[u8] {
        &self.data()[UDP_HEADER_LEN..self.length()]
    }

    /// Verifies the checksum given the enclosing IP pseudo-header sum.
    /// A zero checksum means "not computed" and always verifies.
    pub fn verify_checksum(&self, pseudo_header: u32) -> bool {
        self.checksum() == 0 || checksum_with(pseudo_header, &self.data()[..self.length()]) == 0
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> UdpHeader<B> {
    pub fn set_source_port(&mut self, port: u16) {
        self.buf.as_mut()[0..2].copy_from_slice(&port.to_be_bytes());
    }

    pub fn set_destination_port(&mut self, port: u16) {
        self.buf.as_mut()[2..4].copy_from_slice(&port.to_be_bytes());
    }

    /// Sets the length field from the payload length
    pub fn set_payload_len(&mut self, len: usize) -> PacketResult<()> {
        let length = u16::try_from(len + UDP_HEADER_LEN)
            .ok()
            .filter(|length| *length as usize <= self.buf.as_ref().len())
            .ok_or(PacketError::PayloadTooLarge(len))?;
        self.buf.as_mut()[4..6].copy_from_slice(&length.to_be_bytes());
        Ok(())
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let end = self.length();
        &mut self.buf.as_mut()[UDP_HEADER_LEN..end]
    }

    /// Computes the checksum over header, payload and the given pseudo-header sum
    pub fn set_checksum(&mut self, pseudo_header: u32) {
        let length = self.length();
        let data = self.buf.as_mut();
        data[6..8].fill(0);
        let mut sum = checksum_with(pseudo_header, &data[..length]);
        if sum == 0 {
            // Zero is reserved for "no checksum"
            sum = 0xFFFF;
        }
        data[6..8].copy_from_slice(&sum.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::pseudo_header_sum;
    use std::net::IpAddr;

    fn segment(payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; UDP_HEADER_LEN + payload.len()];
        let mut header = UdpHeader { buf: &mut buf[..] };
        header.set_source_port(5000);
        header.set_destination_port(53);
        header.set_payload_len(payload.len()).unwrap();
        header.payload_mut().copy_from_slice(payload);
        buf
    }

    fn pseudo(len: usize) -> u32 {
        let src: IpAddr = "10.0.0.1".parse().unwrap();
        let dst: IpAddr = "10.0.0.2".parse().unwrap();
        pseudo_header_sum(src, dst, 17, len as u32)
    }

    #[test]
    fn test_fields() {
        let buf = segment(b"hello");
        let header = UdpHeader::new_checked(&buf[..]).unwrap();

        assert_eq!(header.source_port(), 5000);
        assert_eq!(header.destination_port(), 53);
        assert_eq!(header.length(), 13);
        assert_eq!(header.payload_len(), 5);
        assert_eq!(header.payload(), b"hello");
    }

    #[test]
    fn test_checksum() {
        let mut buf = segment(b"hello");
        let mut header = UdpHeader::new_checked(&mut buf[..]).unwrap();
        header.set_checksum(pseudo(13));
        assert_ne!(header.checksum(), 0);
        assert!(header.verify_checksum(pseudo(13)));

        buf[9] ^= 0xFF;
        let header = UdpHeader::new_checked(&buf[..]).unwrap();
        assert!(!header.verify_checksum(pseudo(13)));
    }

    #[test]
    fn test_zero_checksum_verifies() {
        let buf = segment(b"hello");
        let header = UdpHeader::new_checked(&buf[..]).unwrap();
        assert!(header.verify_checksum(pseudo(13)));
    }

    #[test]
    fn test_rejects_bad_length() {
        let mut buf = segment(b"hello");
        buf[5] = 64;
        assert_eq!(
            UdpHeader::new_checked(&buf[..]).unwrap_err(),
            PacketError::BadLength(64)
        );
        assert_eq!(
            UdpHeader::new_checked(&buf[..4]).unwrap_err(),
            PacketError::Truncated(4)
        );
    }

    #[test]
    fn test_payload_len_bounded_by_buffer() {
        let mut buf = vec![0u8; UDP_HEADER_LEN + 2];
        let mut header = UdpHeader { buf: &mut buf[..] };
        assert_eq!(
            header.set_payload_len(3),
            Err(PacketError::PayloadTooLarge(3))
        );
    }
}
