//! Lease table and persistence
//!
//! One lease per client-id (option 61, or the chaddr when absent). IPs are
//! drawn from the owning subnet's allocation range; the table is rewritten
//! to disk atomically whenever an allocated lease changes.

use super::subnet::SubnetConfig;
use chrono::{DateTime, Utc};
use lanhound_core::{Error, MacAddr, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, info, warn};

/// Lease lifecycle:
///
/// ```text
///     DISCOVER             REQUEST(valid)
/// Free ────────► Discover ──────────────► Allocated
///  ▲                 │                        │
///  │   expiry / DECLINE / RELEASE / NAK ──────┘
///  └──────────────────────────────────────────
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LeaseState {
    #[default]
    Free,
    Discover,
    Allocated,
}

/// Which of the handler's two subnets the lease belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubnetSel {
    Home,
    Netfilter,
}

/// One client's lease record, keyed by client-id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub client_id: Vec<u8>,
    pub state: LeaseState,
    pub mac: MacAddr,
    pub ip: Option<Ipv4Addr>,
    pub ip_offer: Option<Ipv4Addr>,
    pub xid: [u8; 4],
    pub expiry: DateTime<Utc>,
    /// Retry counter for adversarial re-sends
    pub count: u32,
    pub name: String,
    pub subnet: SubnetSel,
}

impl Lease {
    fn new(client_id: Vec<u8>, mac: MacAddr, name: &str, subnet: SubnetSel) -> Self {
        Self {
            client_id,
            state: LeaseState::Free,
            mac,
            ip: None,
            ip_offer: None,
            xid: [0; 4],
            expiry: Utc::now(),
            count: 0,
            name: name.to_string(),
            subnet,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry < now
    }

    /// Reset to Free, dropping any held or offered IP.
    pub fn reset(&mut self) {
        self.state = LeaseState::Free;
        self.ip = None;
        self.ip_offer = None;
        self.count = 0;
    }
}

/// The lease table: exactly one lease per client-id.
#[derive(Debug, Default)]
pub struct LeaseTable {
    map: HashMap<Vec<u8>, Lease>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn find(&self, client_id: &[u8]) -> Option<&Lease> {
        self.map.get(client_id)
    }

    pub fn find_mut(&mut self, client_id: &[u8]) -> Option<&mut Lease> {
        self.map.get_mut(client_id)
    }

    pub fn find_by_ip(&self, ip: Ipv4Addr) -> Option<&Lease> {
        self.map.values().find(|l| l.ip == Some(ip))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.map.values()
    }

    /// Return the client's lease, creating a Free one if unknown. A lease
    /// whose MAC or subnet no longer matches is reset: the device changed
    /// identity or moved between subnets.
    pub fn find_or_create(
        &mut self,
        client_id: &[u8],
        mac: MacAddr,
        name: &str,
        subnet: SubnetSel,
    ) -> &mut Lease {
        let lease = self
            .map
            .entry(client_id.to_vec())
            .or_insert_with(|| Lease::new(client_id.to_vec(), mac, name, subnet));
        if lease.mac != mac || lease.subnet != subnet {
            debug!(
                %mac, ?subnet,
                "lease identity changed, resetting"
            );
            lease.reset();
            lease.mac = mac;
            lease.subnet = subnet;
        }
        if !name.is_empty() {
            lease.name = name.to_string();
        }
        lease
    }

    fn held(&self, ip: Ipv4Addr) -> bool {
        self.map
            .values()
            .any(|l| l.state != LeaseState::Free && (l.ip == Some(ip) || l.ip_offer == Some(ip)))
    }

    /// Pick an IP to offer `client_id` from `subnet`'s range:
    /// an already assigned or offered IP is reused; otherwise the range is
    /// scanned; otherwise the stalest Free/expired lease is evicted.
    pub fn allocate(
        &mut self,
        client_id: &[u8],
        subnet: &super::subnet::Subnet,
    ) -> Result<Ipv4Addr> {
        if let Some(lease) = self.map.get(client_id) {
            if let Some(ip) = lease.ip {
                return Ok(ip);
            }
            if let Some(offer) = lease.ip_offer {
                if subnet.in_range(offer) {
                    return Ok(offer);
                }
            }
        }

        let reserved = [subnet.config.default_gw, subnet.config.dhcp_server];
        let mut candidate = u32::from(subnet.first_ip);
        let last = u32::from(subnet.last_ip);
        while candidate <= last {
            let ip = Ipv4Addr::from(candidate);
            if !reserved.contains(&ip) && !self.held(ip) {
                return Ok(ip);
            }
            candidate += 1;
        }

        // Pool exhausted: evict the stalest lease that no longer defends
        // its IP (Free, or past expiry).
        let now = Utc::now();
        let victim = self
            .map
            .values_mut()
            .filter(|l| {
                l.client_id != client_id
                    && (l.ip.is_some() || l.ip_offer.is_some())
                    && (l.state == LeaseState::Free || l.expiry < now)
            })
            .min_by_key(|l| l.expiry);

        match victim {
            Some(victim) => {
                let ip = victim.ip.or(victim.ip_offer).expect("filtered on some");
                info!(ip = %ip, "pool exhausted, evicting stalest lease");
                victim.reset();
                Ok(ip)
            }
            None => Err(Error::Exhausted),
        }
    }

    /// Expiry sweep, run from the minute ticker: expired allocations return
    /// to Free and their IPs to the pool. Returns how many were freed.
    pub fn free_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut freed = 0;
        for lease in self.map.values_mut() {
            if lease.state == LeaseState::Allocated && lease.is_expired(now) {
                debug!(mac = %lease.mac, ip = ?lease.ip, "lease expired");
                lease.reset();
                freed += 1;
            }
        }
        freed
    }
}

const LEASE_FILE_VERSION: u32 = 1;

/// On-disk layout: both subnet configs plus the lease table, versioned.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LeaseFile {
    pub version: u32,
    pub home: SubnetConfig,
    pub netfilter: SubnetConfig,
    pub leases: Vec<Lease>,
}

/// Load the lease file. `None` means "start fresh": missing file, parse
/// error or a version we do not understand.
pub(crate) fn load(path: &Path) -> Option<LeaseFile> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), "cannot read lease file: {e}");
            return None;
        }
    };
    match serde_json::from_slice::<LeaseFile>(&data) {
        Ok(file) if file.version == LEASE_FILE_VERSION => Some(file),
        Ok(file) => {
            warn!(version = file.version, "unsupported lease file version");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), "invalid lease file, resetting: {e}");
            None
        }
    }
}

/// Atomically rewrite the lease file: write a temp file, then rename over
/// the target.
pub(crate) fn save(
    path: &Path,
    home: &SubnetConfig,
    netfilter: &SubnetConfig,
    table: &LeaseTable,
) -> Result<()> {
    let file = LeaseFile {
        version: LEASE_FILE_VERSION,
        home: home.clone(),
        netfilter: netfilter.clone(),
        leases: table.map.values().cloned().collect(),
    };
    let data = serde_json::to_vec_pretty(&file)
        .map_err(|e| Error::Protocol(format!("lease serialization: {e}")))?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn table_from_leases(leases: Vec<Lease>) -> LeaseTable {
    let mut table = LeaseTable::new();
    for lease in leases {
        table.map.insert(lease.client_id.clone(), lease);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhcp4::subnet::{Subnet, SubnetConfig};
    use chrono::TimeDelta;
    use lanhound_core::HuntStage;
    use std::time::Duration;

    fn small_subnet() -> Subnet {
        Subnet::new(SubnetConfig {
            lan: "192.168.0.0/24".parse().unwrap(),
            default_gw: Ipv4Addr::new(192, 168, 0, 11),
            dhcp_server: Ipv4Addr::new(192, 168, 0, 129),
            dns_server: Ipv4Addr::new(192, 168, 0, 11),
            duration: Duration::from_secs(14400),
            stage: HuntStage::Normal,
            first_ip: Some(Ipv4Addr::new(192, 168, 0, 10)),
            last_ip: Some(Ipv4Addr::new(192, 168, 0, 12)),
        })
        .unwrap()
    }

    fn cid(last: u8) -> Vec<u8> {
        vec![1, 0, 2, 3, 4, 5, last]
    }

    fn mac(last: u8) -> MacAddr {
        MacAddr([0, 2, 3, 4, 5, last])
    }

    #[test]
    fn test_one_lease_per_client_id() {
        let mut table = LeaseTable::new();
        table.find_or_create(&cid(1), mac(1), "a", SubnetSel::Home);
        table.find_or_create(&cid(1), mac(1), "b", SubnetSel::Home);
        assert_eq!(table.len(), 1);
        assert_eq!(table.find(&cid(1)).unwrap().name, "b");
    }

    #[test]
    fn test_subnet_change_resets_lease() {
        let mut table = LeaseTable::new();
        let lease = table.find_or_create(&cid(1), mac(1), "", SubnetSel::Home);
        lease.state = LeaseState::Allocated;
        lease.ip = Some(Ipv4Addr::new(192, 168, 0, 10));

        let lease = table.find_or_create(&cid(1), mac(1), "", SubnetSel::Netfilter);
        assert_eq!(lease.state, LeaseState::Free);
        assert!(lease.ip.is_none());
        assert_eq!(lease.subnet, SubnetSel::Netfilter);
    }

    #[test]
    fn test_allocate_skips_reserved_and_held() {
        let subnet = small_subnet();
        let mut table = LeaseTable::new();

        let ip1 = table.allocate(&cid(1), &subnet).unwrap();
        assert_eq!(ip1, Ipv4Addr::new(192, 168, 0, 10));
        {
            let lease = table.find_or_create(&cid(1), mac(1), "", SubnetSel::Home);
            lease.state = LeaseState::Discover;
            lease.ip_offer = Some(ip1);
        }

        let ip2 = table.allocate(&cid(2), &subnet).unwrap();
        assert_eq!(ip2, Ipv4Addr::new(192, 168, 0, 11));
    }

    #[test]
    fn test_allocate_reuses_existing_assignment() {
        let subnet = small_subnet();
        let mut table = LeaseTable::new();
        {
            let lease = table.find_or_create(&cid(1), mac(1), "", SubnetSel::Home);
            lease.state = LeaseState::Allocated;
            lease.ip = Some(Ipv4Addr::new(192, 168, 0, 12));
        }
        assert_eq!(
            table.allocate(&cid(1), &subnet).unwrap(),
            Ipv4Addr::new(192, 168, 0, 12)
        );
    }

    #[test]
    fn test_exhaustion_evicts_stalest_then_fails() {
        let subnet = small_subnet();
        let mut table = LeaseTable::new();

        // fill the three-address range; client 1 is the stalest and expired
        for n in 1..=3u8 {
            let ip = table.allocate(&cid(n), &subnet).unwrap();
            let lease = table.find_or_create(&cid(n), mac(n), "", SubnetSel::Home);
            lease.state = LeaseState::Allocated;
            lease.ip = Some(ip);
            lease.expiry = Utc::now() - TimeDelta::seconds(100 - n as i64);
        }

        let ip = table.allocate(&cid(4), &subnet).unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 0, 10));
        assert_eq!(table.find(&cid(1)).unwrap().state, LeaseState::Free);

        // make the remaining leases current again; nothing left to evict
        for n in 2..=3u8 {
            table.find_mut(&cid(n)).unwrap().expiry = Utc::now() + TimeDelta::seconds(3600);
        }
        {
            let lease = table.find_or_create(&cid(4), mac(4), "", SubnetSel::Home);
            lease.state = LeaseState::Allocated;
            lease.ip = Some(ip);
            lease.expiry = Utc::now() + TimeDelta::seconds(3600);
        }
        assert!(matches!(
            table.allocate(&cid(5), &subnet),
            Err(Error::Exhausted)
        ));
    }

    #[test]
    fn test_no_two_allocated_leases_share_an_ip() {
        let subnet = small_subnet();
        let mut table = LeaseTable::new();
        for n in 1..=3u8 {
            let ip = table.allocate(&cid(n), &subnet).unwrap();
            let lease = table.find_or_create(&cid(n), mac(n), "", SubnetSel::Home);
            lease.state = LeaseState::Allocated;
            lease.ip = Some(ip);
            lease.expiry = Utc::now() + TimeDelta::seconds(3600);
        }

        let mut seen = std::collections::HashSet::new();
        for lease in table.iter() {
            if lease.state == LeaseState::Allocated {
                let ip = lease.ip.unwrap();
                assert!(seen.insert(ip), "duplicate allocated ip {ip}");
                assert!(subnet.in_range(ip));
            }
        }
    }

    #[test]
    fn test_free_expired() {
        let mut table = LeaseTable::new();
        {
            let lease = table.find_or_create(&cid(1), mac(1), "", SubnetSel::Home);
            lease.state = LeaseState::Allocated;
            lease.ip = Some(Ipv4Addr::new(192, 168, 0, 10));
            lease.expiry = Utc::now() - TimeDelta::seconds(10);
        }
        assert_eq!(table.free_expired(Utc::now()), 1);
        let lease = table.find(&cid(1)).unwrap();
        assert_eq!(lease.state, LeaseState::Free);
        assert!(lease.ip.is_none());
        assert_eq!(table.free_expired(Utc::now()), 0);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases.json");
        let subnet = small_subnet();

        let mut table = LeaseTable::new();
        {
            let lease = table.find_or_create(&cid(1), mac(1), "printer", SubnetSel::Home);
            lease.state = LeaseState::Allocated;
            lease.ip = Some(Ipv4Addr::new(192, 168, 0, 10));
            lease.expiry = Utc::now() + TimeDelta::seconds(3600);
        }

        save(&path, &subnet.config, &subnet.config, &table).unwrap();
        let file = load(&path).unwrap();
        assert_eq!(file.leases.len(), 1);
        assert_eq!(file.home, subnet.config);

        let restored = table_from_leases(file.leases);
        let lease = restored.find(&cid(1)).unwrap();
        assert_eq!(lease.name, "printer");
        assert_eq!(lease.ip, Some(Ipv4Addr::new(192, 168, 0, 10)));
        assert_eq!(lease.state, LeaseState::Allocated);
    }

    #[test]
    fn test_load_missing_or_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases.json");
        assert!(load(&path).is_none());

        std::fs::write(&path, b"{ not json").unwrap();
        assert!(load(&path).is_none());
    }
}
