//! ICMPv4 handler
//!
//! The redirect-confirmation point for IPv4 hunts: once a hunted host's
//! traffic arrives addressed to our MAC but not to our IP, the host is
//! routing through us and the hunt has succeeded.

use async_trait::async_trait;
use lanhound_core::{Addr, HuntStage, Result};
use lanhound_packet::{EthernetFrame, Ipv4Packet};
use lanhound_session::{Hunter, Session};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Icmp4Handler {
    session: Arc<Session>,
    hunting: Mutex<HashSet<Ipv4Addr>>,
    redirected: Mutex<HashSet<Ipv4Addr>>,
}

impl Icmp4Handler {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new(Self {
            session,
            hunting: Mutex::new(HashSet::new()),
            redirected: Mutex::new(HashSet::new()),
        })
    }

    /// Inspect any received IPv4 frame for redirect confirmation. Returns
    /// true the first time a hunted source is seen routing through us.
    pub fn observe_forwarded(&self, eth: &EthernetFrame, ip4: &Ipv4Packet) -> bool {
        let nic = &self.session.nic_info;
        let our_ip = match nic.host_addr4.ip4() {
            Some(ip) => ip,
            None => return false,
        };

        // forwarded traffic: ethernet-addressed to us, IP-addressed elsewhere
        if eth.dst() != nic.host_addr4.mac || ip4.dst() == our_ip {
            return false;
        }
        if ip4.dst().is_broadcast() || ip4.dst().is_multicast() {
            return false;
        }

        let src = ip4.src();
        if !self.hunting.lock().contains(&src) {
            return false;
        }
        let newly = self.redirected.lock().insert(src);
        if newly {
            info!(ip = %src, "ipv4 traffic redirected through us");
        }
        newly
    }

    /// Process an ICMPv4 message: echo replies refresh the sender's record.
    pub fn process_packet(&self, eth: &EthernetFrame, ip4: &Ipv4Packet) -> Result<()> {
        if eth.src() == self.session.nic_info.host_addr4.mac || ip4.src().is_unspecified() {
            return Ok(());
        }
        let (host, _) = self
            .session
            .find_or_create_host(Addr::new(eth.src(), IpAddr::V4(ip4.src())))?;
        self.session.notice(&host);
        Ok(())
    }
}

#[async_trait]
impl Hunter for Icmp4Handler {
    async fn start_hunt(&self, addr: Addr) -> Result<HuntStage> {
        let IpAddr::V4(ip) = addr.ip else {
            return Ok(HuntStage::NoChange);
        };
        self.hunting.lock().insert(ip);
        debug!(%ip, "icmp4 hunt started");
        Ok(HuntStage::Hunt)
    }

    async fn stop_hunt(&self, addr: Addr) -> Result<HuntStage> {
        let IpAddr::V4(ip) = addr.ip else {
            return Ok(HuntStage::NoChange);
        };
        self.hunting.lock().remove(&ip);
        self.redirected.lock().remove(&ip);
        Ok(HuntStage::Normal)
    }

    async fn check_addr(&self, addr: Addr) -> Result<HuntStage> {
        let IpAddr::V4(ip) = addr.ip else {
            return Ok(HuntStage::NoChange);
        };
        if self.redirected.lock().contains(&ip) {
            return Ok(HuntStage::Redirected);
        }
        if self.hunting.lock().contains(&ip) {
            return Ok(HuntStage::Hunt);
        }
        Ok(HuntStage::Normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanhound_core::{ethertypes, BufferConn, MacAddr, NicInfo};
    use lanhound_packet::{ethernet, ip};
    use lanhound_session::SessionConfig;

    fn test_nic() -> NicInfo {
        NicInfo {
            name: "test0".to_string(),
            host_addr4: Addr::new(
                MacAddr([0x02; 6]),
                IpAddr::V4(Ipv4Addr::new(192, 168, 0, 129)),
            ),
            router_addr4: Addr::new(
                MacAddr([0x01; 6]),
                IpAddr::V4(Ipv4Addr::new(192, 168, 0, 11)),
            ),
            home_lan4: "192.168.0.0/24".parse().unwrap(),
            host_lla: None,
        }
    }

    fn ipv4_frame(src_mac: MacAddr, dst_mac: MacAddr, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let mut payload = [0u8; ip::HEADER_LEN];
        ip::build_header(&mut payload, src, dst, ip::protocols::ICMP, 0).unwrap();
        ethernet::frame(dst_mac, src_mac, ethertypes::IPV4, &payload)
    }

    #[tokio::test]
    async fn test_redirect_confirmation() {
        let conn = Arc::new(BufferConn::new());
        let session = Session::new(SessionConfig::new(conn, test_nic())).unwrap();
        let handler = Icmp4Handler::new(session);

        let victim_ip = Ipv4Addr::new(192, 168, 0, 42);
        let victim = Addr::new(MacAddr([0, 2, 3, 4, 5, 3]), IpAddr::V4(victim_ip));
        handler.start_hunt(victim).await.unwrap();
        assert_eq!(handler.check_addr(victim).await.unwrap(), HuntStage::Hunt);

        // victim sends to the internet via our MAC: redirect confirmed
        let frame = ipv4_frame(
            victim.mac,
            MacAddr([0x02; 6]),
            victim_ip,
            Ipv4Addr::new(8, 8, 8, 8),
        );
        let eth = EthernetFrame::new(&frame).unwrap();
        let ip4 = Ipv4Packet::new(eth.payload()).unwrap();
        assert!(handler.observe_forwarded(&eth, &ip4));
        // only reported once
        assert!(!handler.observe_forwarded(&eth, &ip4));
        assert_eq!(
            handler.check_addr(victim).await.unwrap(),
            HuntStage::Redirected
        );

        handler.stop_hunt(victim).await.unwrap();
        assert_eq!(handler.check_addr(victim).await.unwrap(), HuntStage::Normal);
    }

    #[tokio::test]
    async fn test_traffic_to_us_is_not_forwarding() {
        let conn = Arc::new(BufferConn::new());
        let session = Session::new(SessionConfig::new(conn, test_nic())).unwrap();
        let handler = Icmp4Handler::new(session);

        let victim_ip = Ipv4Addr::new(192, 168, 0, 42);
        let victim = Addr::new(MacAddr([0, 2, 3, 4, 5, 3]), IpAddr::V4(victim_ip));
        handler.start_hunt(victim).await.unwrap();

        // addressed to our IP: plain traffic, not a redirect
        let frame = ipv4_frame(
            victim.mac,
            MacAddr([0x02; 6]),
            victim_ip,
            Ipv4Addr::new(192, 168, 0, 129),
        );
        let eth = EthernetFrame::new(&frame).unwrap();
        let ip4 = Ipv4Packet::new(eth.payload()).unwrap();
        assert!(!handler.observe_forwarded(&eth, &ip4));

        // not hunted: ignored even when forwarded
        let frame = ipv4_frame(
            MacAddr([0, 2, 3, 4, 5, 9]),
            MacAddr([0x02; 6]),
            Ipv4Addr::new(192, 168, 0, 99),
            Ipv4Addr::new(8, 8, 8, 8),
        );
        let eth = EthernetFrame::new(&frame).unwrap();
        let ip4 = Ipv4Packet::new(eth.payload()).unwrap();
        assert!(!handler.observe_forwarded(&eth, &ip4));
    }
}
