//! Internet checksum helpers (RFC 1071)

use std::net::IpAddr;

/// Ones' complement sum of the 16-bit big-endian words in `data`.
/// An odd trailing byte is padded with zero.
#[inline]
pub fn ones_complement_sum(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    sum
}

/// Fold a 32-bit sum into 16 bits
#[inline]
pub fn fold_checksum(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Checksum of `data` added to an already accumulated `initial` sum
#[inline]
pub fn checksum_with(initial: u32, data: &[u8]) -> u16 {
    // Fold before adding so a long packet cannot overflow the accumulator
    let sum = fold_checksum(initial) as u32 + fold_checksum(ones_complement_sum(data)) as u32;
    !fold_checksum(sum)
}

#[inline]
pub fn compute_checksum(data: &[u8]) -> u16 {
    checksum_with(0, data)
}

/// Pseudo-header contribution to a TCP/UDP checksum.
///
/// `length` is the upper-layer length (header plus payload). Mixed address
/// families never occur in a valid packet; callers check that first.
pub fn pseudo_header_sum(src: IpAddr, dst: IpAddr, protocol: u8, length: u32) -> u32 {
    let mut sum: u32 = 0;
    match (src, dst) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            sum += ones_complement_sum(&src.octets());
            sum += ones_complement_sum(&dst.octets());
        }
        (src, dst) => {
            sum += ones_complement_sum(&to_ipv6_octets(src));
            sum += ones_complement_sum(&to_ipv6_octets(dst));
        }
    }
    sum += protocol as u32;
    sum += length >> 16;
    sum += length & 0xFFFF;
    sum
}

fn to_ipv6_octets(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        // Example from RFC 1071 section 3
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(fold_checksum(ones_complement_sum(&data)), 0xddf2);
        assert_eq!(compute_checksum(&data), !0xddf2);
    }

    #[test]
    fn test_odd_length() {
        assert_eq!(ones_complement_sum(&[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
    }

    #[test]
    fn test_known_ipv4_header() {
        // Header from the Wikipedia IPv4 checksum example
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(compute_checksum(&header), 0xb861);
    }

    #[test]
    fn test_checksum_over_data_including_checksum_is_zero() {
        let mut header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let sum = compute_checksum(&header);
        header[10..12].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(compute_checksum(&header), 0);
    }

    #[test]
    fn test_pseudo_header_ipv4() {
        let sum = pseudo_header_sum(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            17,
            12,
        );
        assert_eq!(sum, 0x0a00 + 0x0001 + 0x0a00 + 0x0002 + 17 + 12);
    }
}
