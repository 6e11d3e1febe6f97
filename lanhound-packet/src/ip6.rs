//! IPv6 packet accessors (fixed header only)

use lanhound_core::{Error, Result};
use std::net::Ipv6Addr;

/// IPv6 fixed header size
pub const HEADER_LEN: usize = 40;

/// Accessor view over an IPv6 packet. Extension headers are not walked; the
/// engine only dispatches on the first next-header value.
#[derive(Debug, Clone, Copy)]
pub struct Ipv6Packet<'a> {
    buf: &'a [u8],
}

impl<'a> Ipv6Packet<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::invalid_frame(format!(
                "ipv6 packet too short: {} bytes",
                buf.len()
            )));
        }
        let p = Self { buf };
        if p.version() != 6 {
            return Err(Error::invalid_frame(format!(
                "not ipv6: version {}",
                p.version()
            )));
        }
        Ok(p)
    }

    pub fn version(&self) -> u8 {
        self.buf[0] >> 4
    }

    pub fn payload_len(&self) -> u16 {
        u16::from_be_bytes([self.buf[4], self.buf[5]])
    }

    pub fn next_header(&self) -> u8 {
        self.buf[6]
    }

    pub fn hop_limit(&self) -> u8 {
        self.buf[7]
    }

    pub fn src(&self) -> Ipv6Addr {
        let mut o = [0u8; 16];
        o.copy_from_slice(&self.buf[8..24]);
        Ipv6Addr::from(o)
    }

    pub fn dst(&self) -> Ipv6Addr {
        let mut o = [0u8; 16];
        o.copy_from_slice(&self.buf[24..40]);
        Ipv6Addr::from(o)
    }

    pub fn payload(&self) -> &'a [u8] {
        let end = (HEADER_LEN + self.payload_len() as usize).min(self.buf.len());
        &self.buf[HEADER_LEN..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ns_frame() {
        let src_mac = lanhound_core::MacAddr([0, 2, 3, 4, 5, 1]);
        let lla: Ipv6Addr = "fe80::1".parse().unwrap();
        let target: Ipv6Addr = "fe80::2".parse().unwrap();
        let frame = crate::icmp6::neighbor_solicitation_frame(src_mac, &lla, &target);

        let eth = crate::EthernetFrame::new(&frame).unwrap();
        let ip6 = Ipv6Packet::new(eth.payload()).unwrap();
        assert_eq!(ip6.version(), 6);
        assert_eq!(ip6.next_header(), 58);
        assert_eq!(ip6.hop_limit(), 255);
        assert_eq!(ip6.src(), lla);
        assert_eq!(ip6.payload().len(), ip6.payload_len() as usize);
    }

    #[test]
    fn test_rejects_short_or_wrong_version() {
        assert!(Ipv6Packet::new(&[0u8; 39]).is_err());
        let mut buf = [0u8; 40];
        buf[0] = 0x45;
        assert!(Ipv6Packet::new(&buf).is_err());
    }
}
