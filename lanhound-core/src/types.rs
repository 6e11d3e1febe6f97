//! Common types used throughout lanhound

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// MAC Address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Create a new MAC address
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Broadcast MAC address (ff:ff:ff:ff:ff:ff)
    pub const fn broadcast() -> Self {
        Self([0xff, 0xff, 0xff, 0xff, 0xff, 0xff])
    }

    /// Zero MAC address (00:00:00:00:00:00)
    pub const fn zero() -> Self {
        Self([0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
    }

    /// Ethernet multicast address for an IPv6 solicited-node group.
    ///
    /// 33:33 followed by the low-order 4 bytes of the IPv6 address.
    pub fn ipv6_multicast(ip: &Ipv6Addr) -> Self {
        let o = ip.octets();
        Self([0x33, 0x33, o[12], o[13], o[14], o[15]])
    }

    /// Get bytes as slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to array
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Build from a slice; returns None unless exactly 6 bytes
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() == 6 {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(slice);
            Some(Self(bytes))
        } else {
            None
        }
    }

    /// True if the group bit of the first octet is set
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    /// True for ff:ff:ff:ff:ff:ff
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    /// True for 00:00:00:00:00:00
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(crate::Error::InvalidMac(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| crate::Error::InvalidMac(s.to_string()))?;
        }

        Ok(MacAddr(bytes))
    }
}

/// A link-layer address: MAC plus IP and an optional UDP port.
///
/// Equality is by field bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Addr {
    pub mac: MacAddr,
    pub ip: IpAddr,
    pub port: Option<u16>,
}

impl Addr {
    pub fn new(mac: MacAddr, ip: IpAddr) -> Self {
        Self {
            mac,
            ip,
            port: None,
        }
    }

    pub fn with_port(mac: MacAddr, ip: IpAddr, port: u16) -> Self {
        Self {
            mac,
            ip,
            port: Some(port),
        }
    }

    /// IPv4 address if this Addr holds one
    pub fn ip4(&self) -> Option<Ipv4Addr> {
        match self.ip {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        }
    }

    /// True if the IP is the all-zeros address of its family
    pub fn is_unspecified(&self) -> bool {
        self.ip.is_unspecified()
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{} {}:{}", self.mac, self.ip, port),
            None => write!(f, "{} {}", self.mac, self.ip),
        }
    }
}

/// Per-host redirection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HuntStage {
    /// Not captured; traffic follows the real router
    #[default]
    Normal,
    /// Capture in progress; handlers are actively hunting the host
    Hunt,
    /// Return traffic confirmed flowing through this host
    Redirected,
    /// Handler has no opinion; keep the current stage
    NoChange,
}

impl fmt::Display for HuntStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HuntStage::Normal => "normal",
            HuntStage::Hunt => "hunt",
            HuntStage::Redirected => "redirected",
            HuntStage::NoChange => "nochange",
        };
        write!(f, "{s}")
    }
}

/// A host name attributed to a MAC, tagged with the protocol that learnt it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    pub name: String,
    pub source: String,
}

impl NameEntry {
    pub fn new<S: Into<String>>(name: S, source: &str) -> Self {
        Self {
            name: name.into(),
            source: source.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

/// Ethertype constants
pub mod ethertypes {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const DOT1Q: u16 = 0x8100;
    pub const IPV6: u16 = 0x86DD;
}

/// Well-known ports and addresses
pub mod wellknown {
    use std::net::Ipv4Addr;

    pub const DHCP4_SERVER_PORT: u16 = 67;
    pub const DHCP4_CLIENT_PORT: u16 = 68;

    pub const IP4_BROADCAST: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);
}
