//! ARP packet accessors and frame builders (RFC 826)

use crate::ethernet;
use lanhound_core::{ethertypes, Error, MacAddr, Result};
use std::net::Ipv4Addr;

/// ARP payload size for Ethernet/IPv4
pub const PACKET_LEN: usize = 28;

pub const OPERATION_REQUEST: u16 = 1;
pub const OPERATION_REPLY: u16 = 2;

/// Accessor view over an Ethernet/IPv4 ARP packet.
#[derive(Debug, Clone, Copy)]
pub struct ArpPacket<'a> {
    buf: &'a [u8],
}

impl<'a> ArpPacket<'a> {
    /// Wrap `buf`, rejecting short packets and non Ethernet/IPv4 bindings.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < PACKET_LEN {
            return Err(Error::invalid_frame(format!(
                "arp packet too short: {} bytes",
                buf.len()
            )));
        }
        let p = Self { buf };
        if p.htype() != 1 || p.ptype() != ethertypes::IPV4 || buf[4] != 6 || buf[5] != 4 {
            return Err(Error::invalid_frame("arp: not an ethernet/ipv4 binding"));
        }
        Ok(p)
    }

    pub fn htype(&self) -> u16 {
        u16::from_be_bytes([self.buf[0], self.buf[1]])
    }

    pub fn ptype(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    pub fn operation(&self) -> u16 {
        u16::from_be_bytes([self.buf[6], self.buf[7]])
    }

    pub fn sender_mac(&self) -> MacAddr {
        mac_at(self.buf, 8)
    }

    pub fn sender_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.buf[14], self.buf[15], self.buf[16], self.buf[17])
    }

    pub fn target_mac(&self) -> MacAddr {
        mac_at(self.buf, 18)
    }

    pub fn target_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.buf[24], self.buf[25], self.buf[26], self.buf[27])
    }

    /// ACD probe: sender IP all zeros while the target IP is being tested
    pub fn is_probe(&self) -> bool {
        self.operation() == OPERATION_REQUEST && self.sender_ip().is_unspecified()
    }

    /// Gratuitous announcement: sender and target IP match
    pub fn is_announcement(&self) -> bool {
        self.operation() == OPERATION_REQUEST && self.sender_ip() == self.target_ip()
    }
}

fn mac_at(buf: &[u8], offset: usize) -> MacAddr {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&buf[offset..offset + 6]);
    MacAddr(mac)
}

fn payload(
    operation: u16,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> [u8; PACKET_LEN] {
    let mut p = [0u8; PACKET_LEN];
    p[0..2].copy_from_slice(&1u16.to_be_bytes());
    p[2..4].copy_from_slice(&ethertypes::IPV4.to_be_bytes());
    p[4] = 6;
    p[5] = 4;
    p[6..8].copy_from_slice(&operation.to_be_bytes());
    p[8..14].copy_from_slice(sender_mac.as_bytes());
    p[14..18].copy_from_slice(&sender_ip.octets());
    p[18..24].copy_from_slice(target_mac.as_bytes());
    p[24..28].copy_from_slice(&target_ip.octets());
    p
}

/// Broadcast who-has request for `target_ip`.
pub fn request_frame(src_mac: MacAddr, src_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    let arp = payload(
        OPERATION_REQUEST,
        src_mac,
        src_ip,
        MacAddr::zero(),
        target_ip,
    );
    ethernet::frame(MacAddr::broadcast(), src_mac, ethertypes::ARP, &arp)
}

/// Unicast reply claiming `claimed_ip` is at `src_mac`.
pub fn reply_frame(
    src_mac: MacAddr,
    claimed_ip: Ipv4Addr,
    dst_mac: MacAddr,
    dst_ip: Ipv4Addr,
) -> Vec<u8> {
    let arp = payload(OPERATION_REPLY, src_mac, claimed_ip, dst_mac, dst_ip);
    ethernet::frame(dst_mac, src_mac, ethertypes::ARP, &arp)
}

/// Broadcast gratuitous announcement that `ip` is at `mac`.
pub fn announcement_frame(mac: MacAddr, ip: Ipv4Addr) -> Vec<u8> {
    let arp = payload(OPERATION_REQUEST, mac, ip, MacAddr::broadcast(), ip);
    ethernet::frame(MacAddr::broadcast(), mac, ethertypes::ARP, &arp)
}
