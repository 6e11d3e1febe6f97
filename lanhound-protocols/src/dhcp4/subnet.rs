//! DHCP subnets
//!
//! The handler serves two subnets: the home LAN, mirroring the real router,
//! and the netfilter LAN, a distinct /24 whose gateway is a local NAT point.
//! Captured clients are answered from the netfilter subnet and receive
//! classless static routes pointing the home LAN through the netfilter
//! gateway.

use super::options::{self, encode_classless_routes, OptionSet, Route};
use ipnetwork::Ipv4Network;
use lanhound_core::{Error, HuntStage, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Lease duration handed out when the caller does not override it.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(4 * 60 * 60);

/// Offset of the first allocatable IP within the subnet.
const FIRST_IP_OFFSET: u32 = 10;

/// Configured parameters of one subnet. Persisted alongside the lease table
/// so a config change invalidates stale leases on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetConfig {
    pub lan: Ipv4Network,
    pub default_gw: Ipv4Addr,
    pub dhcp_server: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    pub duration: Duration,
    pub stage: HuntStage,
    pub first_ip: Option<Ipv4Addr>,
    pub last_ip: Option<Ipv4Addr>,
}

/// A subnet with its resolved allocation range and pre-built option set.
#[derive(Debug, Clone)]
pub struct Subnet {
    pub config: SubnetConfig,
    pub first_ip: Ipv4Addr,
    pub last_ip: Ipv4Addr,
    pub options: OptionSet,
}

impl Subnet {
    pub fn new(config: SubnetConfig) -> Result<Self> {
        if config.duration.is_zero() {
            return Err(Error::invalid_parameter("duration", "must be non-zero"));
        }
        if !config.lan.contains(config.default_gw) {
            return Err(Error::invalid_parameter(
                "default_gw",
                "gateway not inside the subnet",
            ));
        }
        if config.lan.prefix() > 30 {
            return Err(Error::invalid_parameter("lan", "prefix too long"));
        }

        let network = u32::from(config.lan.network());
        let broadcast = u32::from(config.lan.broadcast());
        let first_ip = config
            .first_ip
            .unwrap_or_else(|| Ipv4Addr::from(network + FIRST_IP_OFFSET));
        let last_ip = config.last_ip.unwrap_or_else(|| Ipv4Addr::from(broadcast - 1));

        if !config.lan.contains(first_ip)
            || !config.lan.contains(last_ip)
            || u32::from(first_ip) > u32::from(last_ip)
        {
            return Err(Error::invalid_parameter(
                "first_ip/last_ip",
                "allocation range outside the subnet",
            ));
        }

        let mut subnet = Self {
            first_ip,
            last_ip,
            options: OptionSet::new(),
            config,
        };
        subnet.build_options();
        Ok(subnet)
    }

    fn build_options(&mut self) {
        let cfg = &self.config;
        let renewal = (cfg.duration.as_secs() / 2) as u32;
        let rebind = (cfg.duration.as_secs() * 7 / 8) as u32;

        self.options
            .insert(options::OPTION_SUBNET_MASK, cfg.lan.mask().octets().to_vec());
        self.options
            .insert(options::OPTION_ROUTER, cfg.default_gw.octets().to_vec());
        self.options
            .insert(options::OPTION_DNS_SERVER, cfg.dns_server.octets().to_vec());
        self.options.insert(
            options::OPTION_BROADCAST_ADDRESS,
            cfg.lan.broadcast().octets().to_vec(),
        );
        self.options
            .insert(options::OPTION_RENEWAL_TIME, renewal.to_be_bytes().to_vec());
        self.options
            .insert(options::OPTION_REBIND_TIME, rebind.to_be_bytes().to_vec());
    }

    /// Advertise routes through `via`: the home LAN and a default route.
    /// Applied to the netfilter subnet so captured clients still reach the
    /// home LAN while their default path crosses the NAT point.
    pub fn append_route_options(&mut self, home_gw: Ipv4Addr, home_lan: Ipv4Network, via: Ipv4Addr) {
        let routes = [
            Route::new(home_lan.network(), home_lan.prefix(), via),
            Route::default_via(via),
        ];
        self.options.insert(
            options::OPTION_CLASSLESS_STATIC_ROUTE,
            encode_classless_routes(&routes),
        );

        // classic static-route fallback for clients ignoring option 121
        let mut classic = Vec::with_capacity(8);
        classic.extend_from_slice(&home_gw.octets());
        classic.extend_from_slice(&via.octets());
        self.options.insert(options::OPTION_STATIC_ROUTE, classic);
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.config.lan.contains(ip)
    }

    /// True if `ip` is inside the allocation range.
    pub fn in_range(&self, ip: Ipv4Addr) -> bool {
        u32::from(self.first_ip) <= u32::from(ip) && u32::from(ip) <= u32::from(self.last_ip)
    }

    pub fn duration_secs(&self) -> u32 {
        self.config.duration.as_secs() as u32
    }

    pub fn stage(&self) -> HuntStage {
        self.config.stage
    }
}
