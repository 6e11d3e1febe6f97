//! Lanhound protocol handlers
//!
//! The DHCPv4 server/attacker and the ARP/ICMPv4/ICMPv6 handlers that feed
//! the session table and participate in capturing hosts.

pub mod arp;
pub mod dhcp4;
pub mod icmp4;
pub mod icmp6;

pub use arp::ArpHandler;
pub use dhcp4::{Dhcp4Config, Dhcp4Handler, Dhcp4Update, Mode};
pub use icmp4::Icmp4Handler;
pub use icmp6::Icmp6Handler;
