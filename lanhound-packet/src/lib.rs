//! Lanhound frame codecs
//!
//! Offset-and-length accessor views over caller-owned buffers, and in-place
//! builders for the frames the engine emits. Parsing never copies; builders
//! write directly into the target buffer or assemble a `Vec` frame.

pub mod arp;
pub mod checksum;
pub mod ethernet;
pub mod icmp6;
pub mod ip;
pub mod ip6;
pub mod udp;

pub use arp::ArpPacket;
pub use ethernet::EthernetFrame;
pub use icmp6::Icmp6Packet;
pub use ip::Ipv4Packet;
pub use ip6::Ipv6Packet;
pub use udp::UdpPacket;
