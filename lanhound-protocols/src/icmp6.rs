//! ICMPv6 / NDP handler
//!
//! Observes neighbor and router messages to keep IPv6 host records fresh,
//! and hunts by advertising ourselves as the default router with short
//! lifetimes. All NDP we emit uses hop limit 255 as RFC 4861 requires.

use async_trait::async_trait;
use lanhound_core::{Addr, HuntStage, PacketConn, Result};
use lanhound_packet::icmp6::{
    self, Icmp6Packet, TYPE_ECHO_REPLY, TYPE_NEIGHBOR_ADVERTISEMENT, TYPE_NEIGHBOR_SOLICITATION,
    TYPE_ROUTER_ADVERTISEMENT,
};
use lanhound_packet::{EthernetFrame, Ipv6Packet};
use lanhound_session::{sleep_unless_stopped, Hunter, Session};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interval between spoofed router advertisements while hunting.
const RA_INTERVAL: Duration = Duration::from_secs(4);

/// Lifetime carried in spoofed advertisements; short, so the claim decays
/// quickly once hunting stops.
const RA_LIFETIME_SECS: u16 = 30;

pub struct Icmp6Handler {
    session: Arc<Session>,
    hunted: Mutex<HashMap<Ipv6Addr, Arc<AtomicBool>>>,
    redirected: Mutex<HashSet<Ipv6Addr>>,
}

impl Icmp6Handler {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new(Self {
            session,
            hunted: Mutex::new(HashMap::new()),
            redirected: Mutex::new(HashSet::new()),
        })
    }

    /// Process a received ICMPv6 message.
    pub fn process_packet(&self, eth: &EthernetFrame, ip6: &Ipv6Packet) -> Result<()> {
        let nic = &self.session.nic_info;
        if eth.src() == nic.host_addr4.mac {
            return Ok(());
        }
        let Some(icmp) = Icmp6Packet::new(ip6.payload()) else {
            return Ok(());
        };

        match icmp.icmp_type() {
            TYPE_ROUTER_ADVERTISEMENT => {
                // an advertisement from anything but the gateway MAC is a
                // competing (or rogue) router
                if eth.src() != nic.router_addr4.mac {
                    warn!(mac = %eth.src(), "router advertisement from non-gateway");
                }
            }
            TYPE_NEIGHBOR_SOLICITATION | TYPE_NEIGHBOR_ADVERTISEMENT | TYPE_ECHO_REPLY => {}
            _ => return Ok(()),
        }

        let src = ip6.src();
        if src.is_unspecified() {
            // DAD solicitation; the sender has no address yet
            return Ok(());
        }
        let (host, created) = self
            .session
            .find_or_create_host(Addr::new(eth.src(), IpAddr::V6(src)))?;
        if created {
            debug!(addr = %host.addr, "icmp6 discovered host");
        }
        self.session.notice(&host);
        Ok(())
    }

    /// Redirect confirmation for IPv6, analogous to the ICMPv4 handler.
    pub fn observe_forwarded(&self, eth: &EthernetFrame, ip6: &Ipv6Packet) -> bool {
        let nic = &self.session.nic_info;
        if eth.dst() != nic.host_addr4.mac {
            return false;
        }
        if ip6.dst().is_multicast() || Some(ip6.dst()) == nic.host_lla {
            return false;
        }
        let src = ip6.src();
        if !self.hunted.lock().contains_key(&src) {
            return false;
        }
        let newly = self.redirected.lock().insert(src);
        if newly {
            info!(ip = %src, "ipv6 traffic redirected through us");
        }
        newly
    }

    fn spawn_ra_loop(&self, stop: Arc<AtomicBool>) {
        let conn = self.session.conn();
        let host_mac = self.session.nic_info.host_addr4.mac;
        let Some(lla) = self.session.nic_info.host_lla else {
            warn!("cannot hunt over ipv6 without a link-local address");
            return;
        };
        tokio::spawn(async move {
            debug!("router advertisement spoof loop started");
            while !stop.load(Ordering::Acquire) {
                let frame = icmp6::router_advertisement_frame(host_mac, &lla, RA_LIFETIME_SECS);
                if let Err(e) = conn.write_frame(&frame) {
                    debug!("ra spoof send failed: {e}");
                }
                sleep_unless_stopped(&stop, RA_INTERVAL).await;
            }
            // withdraw the claim
            let frame = icmp6::router_advertisement_frame(host_mac, &lla, 0);
            if let Err(e) = conn.write_frame(&frame) {
                debug!("ra withdraw send failed: {e}");
            }
            debug!("router advertisement spoof loop ended");
        });
    }
}

#[async_trait]
impl Hunter for Icmp6Handler {
    async fn start_hunt(&self, addr: Addr) -> Result<HuntStage> {
        let IpAddr::V6(ip) = addr.ip else {
            return Ok(HuntStage::NoChange);
        };
        let stop = Arc::new(AtomicBool::new(false));
        {
            let mut hunted = self.hunted.lock();
            if hunted.contains_key(&ip) {
                return Ok(HuntStage::Hunt);
            }
            hunted.insert(ip, stop.clone());
        }
        self.spawn_ra_loop(stop);
        Ok(HuntStage::Hunt)
    }

    async fn stop_hunt(&self, addr: Addr) -> Result<HuntStage> {
        let IpAddr::V6(ip) = addr.ip else {
            return Ok(HuntStage::NoChange);
        };
        if let Some(stop) = self.hunted.lock().remove(&ip) {
            stop.store(true, Ordering::Release);
        }
        self.redirected.lock().remove(&ip);
        Ok(HuntStage::Normal)
    }

    async fn check_addr(&self, addr: Addr) -> Result<HuntStage> {
        let IpAddr::V6(ip) = addr.ip else {
            return Ok(HuntStage::NoChange);
        };
        if self.redirected.lock().contains(&ip) {
            return Ok(HuntStage::Redirected);
        }
        if self.hunted.lock().contains_key(&ip) {
            return Ok(HuntStage::Hunt);
        }
        Ok(HuntStage::Normal)
    }
}
