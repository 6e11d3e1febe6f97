//! MAC and host tables
//!
//! The session keys hosts two ways: by MAC ([`MacEntry`], owning the list of
//! per-IP [`Host`] records for that device) and globally by IP. Both maps are
//! guarded by the session's global lock; mutable fields of an entry are
//! guarded by the owning MAC entry's row lock.
//!
//! Lock order: session global lock, then `MacEntry::row`, then
//! `Host::state`. Never acquire in the other direction.

use lanhound_core::{Addr, Error, HuntStage, MacAddr, NameEntry, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::SystemTime;

/// One physical device, keyed by MAC.
pub struct MacEntry {
    pub mac: MacAddr,
    /// Row lock guarding every mutable field of this device and its hosts
    pub row: RwLock<MacRow>,
}

/// Mutable state of a [`MacEntry`].
pub struct MacRow {
    pub captured: bool,
    pub is_router: bool,
    /// True iff any owned host is online
    pub online: bool,
    /// IP this MAC was last DHCP-offered; lets ARP spot conflicting claims
    pub ip4_offer: Option<Ipv4Addr>,
    pub dhcp4_name: NameEntry,
    pub mdns_name: NameEntry,
    pub ssdp_name: NameEntry,
    /// Hosts owned by this MAC, unique by IP
    pub hosts: Vec<Arc<Host>>,
}

impl MacEntry {
    fn new(mac: MacAddr) -> Arc<Self> {
        Arc::new(Self {
            mac,
            row: RwLock::new(MacRow {
                captured: false,
                is_router: false,
                online: false,
                ip4_offer: None,
                dhcp4_name: NameEntry::default(),
                mdns_name: NameEntry::default(),
                ssdp_name: NameEntry::default(),
                hosts: Vec::new(),
            }),
        })
    }
}

/// One IP of a device. The addr never changes once stored; everything else
/// lives behind `state`.
pub struct Host {
    pub addr: Addr,
    /// Owning device; the host is removed from the owner's list when deleted
    pub mac_entry: Arc<MacEntry>,
    pub state: RwLock<HostState>,
}

/// Mutable state of a [`Host`].
pub struct HostState {
    pub online: bool,
    pub last_seen: SystemTime,
    pub hunt_stage: HuntStage,
    /// Set on a DHCP name update or hunt-stage change, cleared when the
    /// notification is emitted
    pub dirty: bool,
}

impl Host {
    fn new(addr: Addr, mac_entry: Arc<MacEntry>) -> Arc<Self> {
        Arc::new(Self {
            addr,
            mac_entry,
            state: RwLock::new(HostState {
                online: false,
                last_seen: SystemTime::now(),
                hunt_stage: HuntStage::Normal,
                dirty: false,
            }),
        })
    }
}

/// Table membership; callers hold the session global lock.
#[derive(Default)]
pub(crate) struct Tables {
    pub macs: HashMap<MacAddr, Arc<MacEntry>>,
    pub hosts: HashMap<IpAddr, Arc<Host>>,
}

impl Tables {
    pub fn find_or_create_mac(&mut self, mac: MacAddr) -> Arc<MacEntry> {
        self.macs
            .entry(mac)
            .or_insert_with(|| MacEntry::new(mac))
            .clone()
    }

    /// Find or create the host record for `(mac, ip)`. Returns the host and
    /// whether it was created. An IP already known under a different MAC has
    /// moved devices: the stale record is dropped and recreated.
    pub fn find_or_create_host(&mut self, addr: Addr) -> Result<(Arc<Host>, bool)> {
        if addr.is_unspecified() {
            return Err(Error::InvalidIp(addr.ip.to_string()));
        }

        if let Some(host) = self.hosts.get(&addr.ip) {
            if host.mac_entry.mac == addr.mac {
                return Ok((host.clone(), false));
            }
            self.delete_host(addr.ip);
        }

        let entry = self.find_or_create_mac(addr.mac);
        let host = Host::new(Addr::new(addr.mac, addr.ip), entry.clone());
        entry.row.write().hosts.push(host.clone());
        self.hosts.insert(addr.ip, host.clone());
        Ok((host, true))
    }

    pub fn find_ip(&self, ip: IpAddr) -> Option<Arc<Host>> {
        self.hosts.get(&ip).cloned()
    }

    pub fn find_mac(&self, mac: MacAddr) -> Option<Arc<MacEntry>> {
        self.macs.get(&mac).cloned()
    }

    /// Remove the host from both maps; the MAC entry goes with it once its
    /// host list is empty.
    pub fn delete_host(&mut self, ip: IpAddr) {
        let Some(host) = self.hosts.remove(&ip) else {
            return;
        };
        let empty = {
            let mut row = host.mac_entry.row.write();
            row.hosts.retain(|h| !Arc::ptr_eq(h, &host));
            let online = row.hosts.iter().any(|h| h.state.read().online);
            row.online = online;
            row.hosts.is_empty()
        };
        if empty {
            self.macs.remove(&host.mac_entry.mac);
        }
    }
}
