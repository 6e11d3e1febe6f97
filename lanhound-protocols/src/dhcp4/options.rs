//! DHCP options (RFC 2132, RFC 3442)

use lanhound_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

pub const OPTION_PAD: u8 = 0;
pub const OPTION_SUBNET_MASK: u8 = 1;
pub const OPTION_ROUTER: u8 = 3;
pub const OPTION_DNS_SERVER: u8 = 6;
pub const OPTION_HOST_NAME: u8 = 12;
pub const OPTION_DOMAIN_NAME: u8 = 15;
pub const OPTION_BROADCAST_ADDRESS: u8 = 28;
pub const OPTION_STATIC_ROUTE: u8 = 33;
pub const OPTION_REQUESTED_IP: u8 = 50;
pub const OPTION_LEASE_TIME: u8 = 51;
pub const OPTION_MESSAGE_TYPE: u8 = 53;
pub const OPTION_SERVER_ID: u8 = 54;
pub const OPTION_PARAMETER_REQUEST_LIST: u8 = 55;
pub const OPTION_RENEWAL_TIME: u8 = 58;
pub const OPTION_REBIND_TIME: u8 = 59;
pub const OPTION_CLIENT_ID: u8 = 61;
pub const OPTION_CLASSLESS_STATIC_ROUTE: u8 = 121;
pub const OPTION_END: u8 = 255;

/// Parsed option map: code to value bytes, duplicates keep the last value.
pub type Options<'a> = HashMap<u8, &'a [u8]>;

/// Read an IPv4 address out of an option value.
pub fn option_ip4(value: &[u8]) -> Option<Ipv4Addr> {
    if value.len() < 4 {
        return None;
    }
    Some(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
}

/// Configured server options with a deterministic emit order.
///
/// SubnetMask is always emitted before Router regardless of the request
/// order; ancient clients depend on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionSet {
    entries: Vec<(u8, Vec<u8>)>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an option value.
    pub fn insert(&mut self, code: u8, value: Vec<u8>) {
        if let Some(entry) = self.entries.iter_mut().find(|(c, _)| *c == code) {
            entry.1 = value;
        } else {
            self.entries.push((code, value));
        }
    }

    pub fn get(&self, code: u8) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Select options for a reply: SubnetMask then Router first, then the
    /// client's parameter-request-list order, then the remaining configured
    /// options. MessageType/ServerId/LeaseTime are the reply builder's and
    /// never selected from here.
    pub fn select_order_or_all(&self, prl: Option<&[u8]>) -> Vec<(u8, &[u8])> {
        let reserved = [OPTION_MESSAGE_TYPE, OPTION_SERVER_ID, OPTION_LEASE_TIME];
        let mut out: Vec<(u8, &[u8])> = Vec::with_capacity(self.entries.len());

        self.push_selected(&mut out, &reserved, OPTION_SUBNET_MASK);
        self.push_selected(&mut out, &reserved, OPTION_ROUTER);
        if let Some(prl) = prl {
            for code in prl {
                self.push_selected(&mut out, &reserved, *code);
            }
        }
        for (code, _) in &self.entries {
            self.push_selected(&mut out, &reserved, *code);
        }
        out
    }

    fn push_selected<'a>(&'a self, out: &mut Vec<(u8, &'a [u8])>, reserved: &[u8], code: u8) {
        if reserved.contains(&code) || out.iter().any(|(c, _)| *c == code) {
            return;
        }
        if let Some(value) = self.get(code) {
            out.push((code, value));
        }
    }
}

/// One route of a classless-static-route option (RFC 3442).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub prefix_len: u8,
    pub dest: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl Route {
    pub fn new(dest: Ipv4Addr, prefix_len: u8, gateway: Ipv4Addr) -> Self {
        Self {
            prefix_len,
            dest,
            gateway,
        }
    }

    /// The default route (0.0.0.0/0) via `gateway`.
    pub fn default_via(gateway: Ipv4Addr) -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, 0, gateway)
    }
}

/// Encode routes: per route one prefix-length byte, the significant bytes of
/// the destination, then the 4-byte next hop.
pub fn encode_classless_routes(routes: &[Route]) -> Vec<u8> {
    let mut out = Vec::with_capacity(routes.len() * 9);
    for route in routes {
        out.push(route.prefix_len);
        let significant = (route.prefix_len as usize).div_ceil(8);
        out.extend_from_slice(&route.dest.octets()[..significant]);
        out.extend_from_slice(&route.gateway.octets());
    }
    out
}

/// Decode a classless-static-route option value.
pub fn decode_classless_routes(mut data: &[u8]) -> Result<Vec<Route>> {
    let mut routes = Vec::new();
    while !data.is_empty() {
        let prefix_len = data[0];
        if prefix_len > 32 {
            return Err(Error::invalid_frame(format!(
                "classless route prefix {prefix_len} out of range"
            )));
        }
        let significant = (prefix_len as usize).div_ceil(8);
        if data.len() < 1 + significant + 4 {
            return Err(Error::invalid_frame("classless route truncated"));
        }
        let mut dest = [0u8; 4];
        dest[..significant].copy_from_slice(&data[1..1 + significant]);
        let gw = &data[1 + significant..1 + significant + 4];
        routes.push(Route {
            prefix_len,
            dest: Ipv4Addr::from(dest),
            gateway: Ipv4Addr::new(gw[0], gw[1], gw[2], gw[3]),
        });
        data = &data[1 + significant + 4..];
    }
    Ok(routes)
}
