//! Frame dispatcher
//!
//! A dedicated thread blocks on the raw socket and feeds whole frames into
//! an async dispatcher task. Demultiplexing is by EtherType and UDP port;
//! handler errors never stop the loop, they drop the frame.

use lanhound_core::{ethertypes, Addr, Error, HuntStage, PacketConn, Result};
use lanhound_packet::{ip, EthernetFrame, Ipv4Packet, Ipv6Packet, UdpPacket};
use lanhound_protocols::dhcp4::Dhcp4Update;
use lanhound_protocols::{ArpHandler, Dhcp4Config, Dhcp4Handler, Icmp4Handler, Icmp6Handler};
use lanhound_session::Session;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Largest frame the read loop accepts.
const MAX_FRAME: usize = 2048;

/// Depth of the reader-to-dispatcher queue.
const FRAME_QUEUE: usize = 256;

/// Per-protocol receive counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub arp: AtomicU64,
    pub ip4: AtomicU64,
    pub ip6: AtomicU64,
    pub dhcp4: AtomicU64,
    pub dropped: AtomicU64,
}

impl EngineStats {
    fn count(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The packet engine: session plus protocol handlers.
pub struct Engine {
    pub(crate) session: Arc<Session>,
    pub(crate) dhcp4: Arc<Dhcp4Handler>,
    pub(crate) arp: Arc<ArpHandler>,
    pub(crate) icmp4: Arc<Icmp4Handler>,
    pub(crate) icmp6: Arc<Icmp6Handler>,
    pub stats: EngineStats,
}

impl Engine {
    pub fn new(session: Arc<Session>, dhcp4_config: Dhcp4Config) -> Result<Arc<Self>> {
        let dhcp4 = Dhcp4Handler::new(session.clone(), dhcp4_config)?;
        Ok(Arc::new(Self {
            arp: ArpHandler::new(session.clone()),
            icmp4: Icmp4Handler::new(session.clone()),
            icmp6: Icmp6Handler::new(session.clone()),
            dhcp4,
            session,
            stats: EngineStats::default(),
        }))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn dhcp4(&self) -> &Arc<Dhcp4Handler> {
        &self.dhcp4
    }

    /// Start the read loop, the dispatcher and the DHCP expiry sweep. The
    /// returned handle resolves when the session closes; an `Err(Fatal)`
    /// means the process should be restarted.
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(FRAME_QUEUE);

        // Blocking reader; the conn is shut on close so this thread exits.
        let conn = self.session.conn();
        let session = self.session.clone();
        std::thread::spawn(move || {
            let mut buf = vec![0u8; MAX_FRAME];
            loop {
                match conn.read_frame(&mut buf) {
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            return;
                        }
                    }
                    Err(Error::Closed) => return,
                    Err(e) => {
                        error!("read loop failed: {e}");
                        session.abort("socket read failed");
                        return;
                    }
                }
            }
        });

        // DHCP lease expiry sweep on the minute
        {
            let engine = self.clone();
            let mut close_rx = self.session.close_watch();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(60));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => engine.dhcp4.minute_ticker().await,
                        _ = close_rx.changed() => return,
                    }
                }
            });
        }

        let engine = self.clone();
        tokio::spawn(async move {
            info!("packet engine started");
            while let Some(frame) = rx.recv().await {
                if let Err(e) = engine.dispatch(&frame).await {
                    EngineStats::count(&engine.stats.dropped);
                    debug!("frame dropped: {e}");
                }
            }
            info!("packet engine stopped");
            if engine.session.is_fatal() {
                Err(Error::Fatal("session aborted".to_string()))
            } else {
                Ok(())
            }
        })
    }

    /// Demultiplex and handle one received frame.
    pub async fn dispatch(&self, frame: &[u8]) -> Result<()> {
        let eth = EthernetFrame::new(frame)?;
        match eth.ethertype() {
            ethertypes::ARP => {
                EngineStats::count(&self.stats.arp);
                self.arp.process_packet(&eth)
            }
            ethertypes::IPV4 => {
                EngineStats::count(&self.stats.ip4);
                self.session.mark_ip_heartbeat();
                self.dispatch_ip4(frame, &eth).await
            }
            ethertypes::IPV6 => {
                EngineStats::count(&self.stats.ip6);
                self.dispatch_ip6(&eth)
            }
            _ => Ok(()),
        }
    }

    async fn dispatch_ip4(&self, frame: &[u8], eth: &EthernetFrame<'_>) -> Result<()> {
        let ip4 = Ipv4Packet::new(eth.payload())?;

        // hunted host routing through us: the redirect took hold
        if self.icmp4.observe_forwarded(eth, &ip4) {
            self.session
                .set_hunt_stage(IpAddr::V4(ip4.src()), HuntStage::Redirected);
        }

        match ip4.protocol() {
            ip::protocols::UDP => {
                let udp = UdpPacket::new(ip4.payload())?;
                let port = udp.dst_port();
                if port == lanhound_core::wellknown::DHCP4_SERVER_PORT
                    || port == lanhound_core::wellknown::DHCP4_CLIENT_PORT
                {
                    EngineStats::count(&self.stats.dhcp4);
                    if let Some(update) = self.dhcp4.process_frame(frame).await? {
                        self.apply_dhcp_update(update);
                    }
                    return Ok(());
                }
                self.track_sender4(eth, &ip4)
            }
            ip::protocols::ICMP => self.icmp4.process_packet(eth, &ip4),
            _ => self.track_sender4(eth, &ip4),
        }
    }

    fn dispatch_ip6(&self, eth: &EthernetFrame<'_>) -> Result<()> {
        let ip6 = Ipv6Packet::new(eth.payload())?;
        if self.icmp6.observe_forwarded(eth, &ip6) {
            self.session
                .set_hunt_stage(IpAddr::V6(ip6.src()), HuntStage::Redirected);
        }
        if ip6.next_header() == ip::protocols::ICMP6 {
            self.icmp6.process_packet(eth, &ip6)
        } else {
            self.track_sender6(eth, &ip6)
        }
    }

    /// Record LAN senders in the host table. Our own frames and off-LAN
    /// sources (forwarded internet traffic wears the router's MAC) are
    /// ignored.
    fn track_sender4(&self, eth: &EthernetFrame<'_>, ip4: &Ipv4Packet<'_>) -> Result<()> {
        let nic = &self.session.nic_info;
        let src = ip4.src();
        if eth.src() == nic.host_addr4.mac
            || src.is_unspecified()
            || !nic.home_lan4.contains(src)
        {
            return Ok(());
        }
        let (host, _) = self
            .session
            .find_or_create_host(Addr::new(eth.src(), IpAddr::V4(src)))?;
        self.session.notice(&host);
        Ok(())
    }

    fn track_sender6(&self, eth: &EthernetFrame<'_>, ip6: &Ipv6Packet<'_>) -> Result<()> {
        let nic = &self.session.nic_info;
        let src = ip6.src();
        if eth.src() == nic.host_addr4.mac || src.is_unspecified() || src.is_multicast() {
            return Ok(());
        }
        let (host, _) = self
            .session
            .find_or_create_host(Addr::new(eth.src(), IpAddr::V6(src)))?;
        self.session.notice(&host);
        Ok(())
    }

    /// Fold a DHCP exchange's outcome into the session table.
    fn apply_dhcp_update(&self, update: Dhcp4Update) {
        if update.new_host {
            debug!(addr = %update.addr, "dhcp revealed host binding");
        }
        match self
            .session
            .dhcp_update(update.addr.mac, update.addr.ip, update.name)
        {
            Ok(_) => self.session.set_hunt_stage(update.addr.ip, update.hunt_stage),
            Err(e) => debug!(addr = %update.addr, "dhcp update skipped: {e}"),
        }
    }
}
