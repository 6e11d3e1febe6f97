//! UDP datagram accessors and header builder (RFC 768)

use lanhound_core::{Error, Result};

/// UDP header size
pub const HEADER_LEN: usize = 8;

/// Accessor view over a UDP datagram.
#[derive(Debug, Clone, Copy)]
pub struct UdpPacket<'a> {
    buf: &'a [u8],
}

impl<'a> UdpPacket<'a> {
    /// Wrap `buf`, rejecting short buffers and length-field mismatches.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::invalid_frame(format!(
                "udp packet too short: {} bytes",
                buf.len()
            )));
        }
        let p = Self { buf };
        let length = p.length() as usize;
        if length < HEADER_LEN || length > buf.len() {
            return Err(Error::invalid_frame(format!(
                "udp length mismatch: field={} buffer={}",
                length,
                buf.len()
            )));
        }
        Ok(p)
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buf[0], self.buf[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buf[4], self.buf[5]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buf[HEADER_LEN..self.length() as usize]
    }
}

/// Write a UDP header into the front of `buf`. The checksum is left zero,
/// which is permitted over IPv4. Returns the header length.
pub fn build_header(
    buf: &mut [u8],
    src_port: u16,
    dst_port: u16,
    payload_len: usize,
) -> Result<usize> {
    if buf.len() < HEADER_LEN {
        return Err(Error::invalid_frame("buffer too small for udp header"));
    }
    let length = (HEADER_LEN + payload_len) as u16;
    buf[0..2].copy_from_slice(&src_port.to_be_bytes());
    buf[2..4].copy_from_slice(&dst_port.to_be_bytes());
    buf[4..6].copy_from_slice(&length.to_be_bytes());
    buf[6..8].fill(0);
    Ok(HEADER_LEN)
}
