//! DHCPv4 server and attacker
//!
//! A wire-format-exact RFC 2131 server answering from two subnets (home and
//! netfilter), with lease persistence and an adversarial mode that dislodges
//! the LAN's real DHCP server for captured clients.

pub mod attack;
pub mod lease;
pub mod options;
pub mod packet;
pub mod server;
pub mod subnet;

pub use lease::{Lease, LeaseState, LeaseTable, SubnetSel};
pub use packet::{Dhcp4, MessageType};
pub use server::{Dhcp4Config, Dhcp4Handler, Dhcp4Update, Mode};
pub use subnet::{Subnet, SubnetConfig};

use lanhound_core::{ethertypes, MacAddr};
use lanhound_packet::{ethernet, ip, udp};
use std::net::Ipv4Addr;

/// Assemble a full Ethernet/IPv4/UDP frame around a DHCP payload.
pub fn dhcp_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    dhcp: &[u8],
) -> Vec<u8> {
    let udp_start = ethernet::HEADER_LEN + ip::HEADER_LEN;
    let payload_start = udp_start + udp::HEADER_LEN;
    let mut frame = vec![0u8; payload_start + dhcp.len()];

    ethernet::build_header(&mut frame, dst_mac, src_mac, ethertypes::IPV4)
        .expect("frame sized for headers");
    ip::build_header(
        &mut frame[ethernet::HEADER_LEN..],
        src_ip,
        dst_ip,
        ip::protocols::UDP,
        udp::HEADER_LEN + dhcp.len(),
    )
    .expect("frame sized for headers");
    udp::build_header(&mut frame[udp_start..], src_port, dst_port, dhcp.len())
        .expect("frame sized for headers");
    frame[payload_start..].copy_from_slice(dhcp);
    frame
}
