//! Ethernet II frame accessors and builder

use bytes::{BufMut, BytesMut};
use lanhound_core::{Error, MacAddr, Result};

/// Ethernet header size (dst + src + ethertype)
pub const HEADER_LEN: usize = 14;

/// Accessor view over an Ethernet II frame.
#[derive(Debug, Clone, Copy)]
pub struct EthernetFrame<'a> {
    buf: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    /// Wrap `buf`; fails if shorter than the fixed header.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::invalid_frame(format!(
                "ethernet frame too short: {} bytes",
                buf.len()
            )));
        }
        Ok(Self { buf })
    }

    pub fn dst(&self) -> MacAddr {
        mac_at(self.buf, 0)
    }

    pub fn src(&self) -> MacAddr {
        mac_at(self.buf, 6)
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buf[12], self.buf[13]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buf[HEADER_LEN..]
    }
}

fn mac_at(buf: &[u8], offset: usize) -> MacAddr {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&buf[offset..offset + 6]);
    MacAddr(mac)
}

/// Write an Ethernet header into the front of `buf`, returning the
/// header length.
pub fn build_header(buf: &mut [u8], dst: MacAddr, src: MacAddr, ethertype: u16) -> Result<usize> {
    if buf.len() < HEADER_LEN {
        return Err(Error::invalid_frame("buffer too small for ethernet header"));
    }
    buf[0..6].copy_from_slice(dst.as_bytes());
    buf[6..12].copy_from_slice(src.as_bytes());
    buf[12..14].copy_from_slice(&ethertype.to_be_bytes());
    Ok(HEADER_LEN)
}

/// Assemble a complete frame from header fields and payload.
pub fn frame(dst: MacAddr, src: MacAddr, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut buffer = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buffer.put_slice(dst.as_bytes());
    buffer.put_slice(src.as_bytes());
    buffer.put_u16(ethertype);
    buffer.put_slice(payload);
    buffer.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanhound_core::ethertypes;

    #[test]
    fn test_accessors() {
        let src = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let dst = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let bytes = frame(dst, src, ethertypes::IPV4, &[1, 2, 3]);

        let eth = EthernetFrame::new(&bytes).unwrap();
        assert_eq!(eth.dst(), dst);
        assert_eq!(eth.src(), src);
        assert_eq!(eth.ethertype(), ethertypes::IPV4);
        assert_eq!(eth.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_too_short() {
        assert!(EthernetFrame::new(&[0u8; 13]).is_err());
    }

    #[test]
    fn test_build_header_matches_frame() {
        let src = MacAddr([1, 1, 1, 1, 1, 1]);
        let dst = MacAddr::broadcast();
        let mut buf = [0u8; HEADER_LEN];
        build_header(&mut buf, dst, src, ethertypes::ARP).unwrap();
        assert_eq!(buf.to_vec(), frame(dst, src, ethertypes::ARP, &[]));
    }
}
