//! Network interface information
//!
//! The engine operates on a single NIC. [`NicInfo`] carries the addresses the
//! handlers need: our own MAC/IPv4, the default gateway, the home LAN and the
//! host link-local IPv6 used as the source for NDP probes.

use crate::{Addr, Error, MacAddr, Result};
use ipnetwork::Ipv4Network;
use std::net::{IpAddr, Ipv6Addr};

/// Addressing of the NIC the session is bound to.
#[derive(Debug, Clone)]
pub struct NicInfo {
    /// Interface name (e.g. "eth0")
    pub name: String,
    /// Our MAC and IPv4 address
    pub host_addr4: Addr,
    /// Default gateway MAC and IPv4 address
    pub router_addr4: Addr,
    /// The LAN the NIC is attached to
    pub home_lan4: Ipv4Network,
    /// Host link-local IPv6 address, if one is assigned
    pub host_lla: Option<Ipv6Addr>,
}

impl NicInfo {
    /// Validate field coherence: both IPv4 addresses must be inside the LAN.
    pub fn validate(&self) -> Result<()> {
        let host_ip = self
            .host_addr4
            .ip4()
            .ok_or_else(|| Error::InvalidIp(self.host_addr4.ip.to_string()))?;
        let router_ip = self
            .router_addr4
            .ip4()
            .ok_or_else(|| Error::InvalidIp(self.router_addr4.ip.to_string()))?;

        if !self.home_lan4.contains(host_ip) {
            return Err(Error::invalid_parameter(
                "host_addr4",
                "host IPv4 not inside the home LAN",
            ));
        }
        if !self.home_lan4.contains(router_ip) {
            return Err(Error::invalid_parameter(
                "router_addr4",
                "router IPv4 not inside the home LAN",
            ));
        }
        Ok(())
    }

    /// Fill MAC/IPv4/LAN fields from the running system for `name`.
    ///
    /// The gateway address cannot be discovered portably and is supplied by
    /// the caller.
    pub fn detect(name: &str, router_addr4: Addr) -> Result<Self> {
        let iface = pnet_datalink::interfaces()
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))?;

        let mac = iface
            .mac
            .map(|m| MacAddr([m.0, m.1, m.2, m.3, m.4, m.5]))
            .ok_or_else(|| Error::Interface(format!("{name}: no MAC address")))?;

        let mut host_ip4 = None;
        let mut home_lan4 = None;
        let mut host_lla = None;
        for net in iface.ips {
            match net {
                ipnetwork::IpNetwork::V4(v4) => {
                    if host_ip4.is_none() {
                        host_ip4 = Some(v4.ip());
                        home_lan4 =
                            Some(Ipv4Network::new(v4.network(), v4.prefix()).map_err(|e| {
                                Error::Interface(format!("{name}: bad network: {e}"))
                            })?);
                    }
                }
                ipnetwork::IpNetwork::V6(v6) => {
                    let ip = v6.ip();
                    if ip.segments()[0] == 0xfe80 && host_lla.is_none() {
                        host_lla = Some(ip);
                    }
                }
            }
        }

        let (host_ip4, home_lan4) = match (host_ip4, home_lan4) {
            (Some(ip), Some(lan)) => (ip, lan),
            _ => return Err(Error::Interface(format!("{name}: no IPv4 address"))),
        };

        let info = Self {
            name: name.to_string(),
            host_addr4: Addr::new(mac, IpAddr::V4(host_ip4)),
            router_addr4,
            home_lan4,
            host_lla,
        };
        info.validate()?;
        Ok(info)
    }
}
