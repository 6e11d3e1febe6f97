//! Session: the engine's shared state and periodic jobs
//!
//! One session exists per NIC. It owns the MAC/host tables, the notification
//! channel, the NIC heartbeat and the minute probe/purge job. Protocol
//! handlers call into the session to resolve frames to hosts and to record
//! traffic observations.

use crate::notify::{Notification, Notifier, CHANNEL_CAPACITY};
use crate::table::{Host, MacEntry, MacRow, Tables};
use lanhound_core::{
    Addr, Error, HuntStage, MacAddr, NameEntry, NicInfo, PacketConn, Result,
};
use lanhound_packet::{arp, icmp6};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Default deadlines
pub const DEFAULT_PROBE_DEADLINE: Duration = Duration::from_secs(60 * 2);
pub const DEFAULT_OFFLINE_DEADLINE: Duration = Duration::from_secs(60 * 5);
pub const DEFAULT_PURGE_DEADLINE: Duration = Duration::from_secs(60 * 61);

/// How often the NIC monitor checks that IPv4 traffic is still arriving.
pub const DEFAULT_MONITOR_FREQUENCY: Duration = Duration::from_secs(60 * 3);

/// Pinned entries (our own host, the gateway) never expire.
const PINNED_LIFETIME: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Suppression window for repeat traffic from an online host.
const LAST_SEEN_GRANULARITY: Duration = Duration::from_secs(1);

/// Session construction parameters.
pub struct SessionConfig {
    pub conn: Arc<dyn PacketConn>,
    pub nic_info: NicInfo,
    /// Probe a host after this much silence
    pub probe_deadline: Duration,
    /// Mark a host offline after this much silence
    pub offline_deadline: Duration,
    /// Delete an offline host after this much silence
    pub purge_deadline: Duration,
    /// NIC heartbeat check interval
    pub monitor_frequency: Duration,
}

impl SessionConfig {
    pub fn new(conn: Arc<dyn PacketConn>, nic_info: NicInfo) -> Self {
        Self {
            conn,
            nic_info,
            probe_deadline: DEFAULT_PROBE_DEADLINE,
            offline_deadline: DEFAULT_OFFLINE_DEADLINE,
            purge_deadline: DEFAULT_PURGE_DEADLINE,
            monitor_frequency: DEFAULT_MONITOR_FREQUENCY,
        }
    }

    fn validate(&self) -> Result<()> {
        self.nic_info.validate()?;
        let max_probe = Duration::from_secs(60 * 30);
        let max_offline = Duration::from_secs(60 * 60);
        let max_purge = Duration::from_secs(60 * 60 * 24);

        if self.probe_deadline.is_zero() || self.probe_deadline > max_probe {
            return Err(Error::invalid_parameter(
                "probe_deadline",
                "must be within (0, 30 minutes]",
            ));
        }
        if self.offline_deadline <= self.probe_deadline || self.offline_deadline > max_offline {
            return Err(Error::invalid_parameter(
                "offline_deadline",
                "must be within (probe_deadline, 60 minutes]",
            ));
        }
        if self.purge_deadline <= self.offline_deadline || self.purge_deadline > max_purge {
            return Err(Error::invalid_parameter(
                "purge_deadline",
                "must be within (offline_deadline, 24 hours]",
            ));
        }
        Ok(())
    }
}

/// Shared engine state for one NIC.
pub struct Session {
    conn: Arc<dyn PacketConn>,
    pub nic_info: NicInfo,
    pub probe_deadline: Duration,
    pub offline_deadline: Duration,
    pub purge_deadline: Duration,
    monitor_frequency: Duration,

    tables: RwLock<Tables>,
    notifier: Notifier,
    /// Set to 1 on every received IPv4 datagram, cleared by the NIC monitor
    ip_heartbeat: AtomicU32,
    fatal: AtomicBool,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl Session {
    /// Build the session and pin the host and gateway entries. Periodic jobs
    /// are not started; see [`Session::start`].
    pub fn new(config: SessionConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let (close_tx, _) = watch::channel(false);

        let session = Arc::new(Self {
            conn: config.conn,
            nic_info: config.nic_info,
            probe_deadline: config.probe_deadline,
            offline_deadline: config.offline_deadline,
            purge_deadline: config.purge_deadline,
            monitor_frequency: config.monitor_frequency,
            tables: RwLock::new(Tables::default()),
            notifier: Notifier::new(CHANNEL_CAPACITY),
            ip_heartbeat: AtomicU32::new(0),
            fatal: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_tx,
        });

        // We never process our own frames, so pin the host entry manually.
        let host_addr = session.nic_info.host_addr4;
        let router_addr = session.nic_info.router_addr4;
        session.pin_host(host_addr, false)?;
        session.pin_host(router_addr, true)?;

        Ok(session)
    }

    /// Build the session and start the minute scheduler and the NIC monitor.
    pub fn start(config: SessionConfig) -> Result<Arc<Self>> {
        let session = Self::new(config)?;
        session.spawn_minute_loop();
        session.spawn_nic_monitor();
        Ok(session)
    }

    fn pin_host(&self, addr: Addr, is_router: bool) -> Result<()> {
        let host = {
            let mut tables = self.tables.write();
            let (host, _) = tables.find_or_create_host(addr)?;
            host
        };
        let mut row = host.mac_entry.row.write();
        row.online = true;
        row.is_router = is_router;
        let mut st = host.state.write();
        st.online = true;
        st.last_seen = SystemTime::now() + PINNED_LIFETIME;
        Ok(())
    }

    fn spawn_minute_loop(self: &Arc<Self>) {
        let session = self.clone();
        let mut close_rx = self.close_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("minute check");
                        session.purge(SystemTime::now());
                    }
                    _ = close_rx.changed() => {
                        info!("session minute loop ended");
                        return;
                    }
                }
            }
        });
    }

    /// Check that IPv4 datagrams keep arriving. A silent interval usually
    /// means the switch port died under us; restarting is the only recovery.
    fn spawn_nic_monitor(self: &Arc<Self>) {
        let session = self.clone();
        let mut close_rx = self.close_tx.subscribe();
        let freq = self.monitor_frequency;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(freq);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if session.ip_heartbeat.swap(0, Ordering::AcqRel) == 0 {
                            error!(duration = ?freq, "failure to receive ip packets");
                            session.abort("nic heartbeat stalled");
                            return;
                        }
                    }
                    _ = close_rx.changed() => {
                        debug!("nic monitoring ended");
                        return;
                    }
                }
            }
        });
    }

    /// Record that an IPv4 datagram arrived; called by the read loop.
    pub fn mark_ip_heartbeat(&self) {
        self.ip_heartbeat.store(1, Ordering::Release);
    }

    /// True once the NIC monitor decided the interface is dead.
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fatal shutdown: record the reason and close. The run loop reports
    /// [`Error::Fatal`] so the operator's supervisor restarts the process.
    pub fn abort(&self, reason: &str) {
        error!(reason, "session aborted");
        self.fatal.store(true, Ordering::Release);
        self.close();
    }

    /// Shut the session: stops periodic jobs, closes the conn so the read
    /// loop returns promptly, and ends the notification stream.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.close_tx.send(true);
        self.notifier.close();
        self.conn.close();
    }

    /// A close-signal receiver for auxiliary tasks.
    pub fn close_watch(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    pub fn conn(&self) -> Arc<dyn PacketConn> {
        self.conn.clone()
    }

    // ----- table access ---------------------------------------------------

    pub fn find_or_create_host(&self, addr: Addr) -> Result<(Arc<Host>, bool)> {
        self.tables.write().find_or_create_host(addr)
    }

    pub fn find_or_create_mac(&self, mac: MacAddr) -> Arc<MacEntry> {
        self.tables.write().find_or_create_mac(mac)
    }

    pub fn find_ip(&self, ip: IpAddr) -> Option<Arc<Host>> {
        self.tables.read().find_ip(ip)
    }

    pub fn find_mac(&self, mac: MacAddr) -> Option<Arc<MacEntry>> {
        self.tables.read().find_mac(mac)
    }

    pub fn delete_host(&self, ip: IpAddr) {
        self.tables.write().delete_host(ip);
    }

    /// Snapshot of every host record.
    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.tables.read().hosts.values().cloned().collect()
    }

    /// All addresses owned by a MAC.
    pub fn ip_addrs(&self, mac: MacAddr) -> Vec<Addr> {
        match self.find_mac(mac) {
            Some(entry) => entry.row.read().hosts.iter().map(|h| h.addr).collect(),
            None => Vec::new(),
        }
    }

    // ----- capture flag ---------------------------------------------------

    /// Flag the MAC as captured. Fails on the gateway.
    pub fn capture(&self, mac: MacAddr) -> Result<()> {
        let entry = self.find_or_create_mac(mac);
        let mut row = entry.row.write();
        if row.captured {
            return Ok(());
        }
        if row.is_router {
            return Err(Error::IsRouter);
        }
        row.captured = true;
        Ok(())
    }

    /// Clear the captured flag.
    pub fn release(&self, mac: MacAddr) -> Result<()> {
        if let Some(entry) = self.find_mac(mac) {
            entry.row.write().captured = false;
        }
        Ok(())
    }

    pub fn is_captured(&self, mac: MacAddr) -> bool {
        match self.find_mac(mac) {
            Some(entry) => entry.row.read().captured,
            None => false,
        }
    }

    // ----- hunt stage -----------------------------------------------------

    /// Set the hunt stage of the host record for `ip`; `NoChange` is a no-op.
    pub fn set_hunt_stage(&self, ip: IpAddr, stage: HuntStage) {
        if stage == HuntStage::NoChange {
            return;
        }
        if let Some(host) = self.find_ip(ip) {
            let _row = host.mac_entry.row.read();
            let mut st = host.state.write();
            if st.hunt_stage != stage {
                st.hunt_stage = stage;
                st.dirty = true;
            }
        }
    }

    pub fn hunt_stage(&self, ip: IpAddr) -> HuntStage {
        match self.find_ip(ip) {
            Some(host) => host.state.read().hunt_stage,
            None => HuntStage::Normal,
        }
    }

    // ----- DHCP hooks -----------------------------------------------------

    /// Record the IP a MAC was last DHCP-offered, so ARP can spot a client
    /// announcing a conflicting address.
    pub fn set_ip4_offer(&self, mac: MacAddr, ip: std::net::Ipv4Addr, name: NameEntry) {
        let entry = self.find_or_create_mac(mac);
        let mut row = entry.row.write();
        row.ip4_offer = Some(ip);
        if !name.is_empty() {
            row.dhcp4_name = name;
        }
    }

    pub fn ip4_offer(&self, mac: MacAddr) -> Option<std::net::Ipv4Addr> {
        self.find_mac(mac).and_then(|e| e.row.read().ip4_offer)
    }

    /// Update the table from a confirmed DHCP binding. Various DHCP messages
    /// arrive with a zero source IP, so the DHCP handler passes the bound IP
    /// explicitly once a server confirms it.
    pub fn dhcp_update(&self, mac: MacAddr, ip: IpAddr, name: NameEntry) -> Result<Arc<Host>> {
        if ip.is_unspecified() {
            return Err(Error::InvalidIp(ip.to_string()));
        }
        let (host, _) = self.find_or_create_host(Addr::new(mac, ip))?;
        if !name.is_empty() {
            let mut row = host.mac_entry.row.write();
            if row.dhcp4_name.name != name.name {
                row.dhcp4_name = name;
                host.state.write().dirty = true;
            }
        }
        self.notice(&host);
        Ok(host)
    }

    // ----- transitions ----------------------------------------------------

    fn to_notification(host: &Arc<Host>, row: &MacRow, online: bool) -> Notification {
        Notification {
            addr: host.addr,
            online,
            dhcp4_name: row.dhcp4_name.name.clone(),
            mdns_name: row.mdns_name.name.clone(),
        }
    }

    /// Record traffic from `host`: refresh `last_seen` and emit transition
    /// notifications. Called by the read loop for every resolved frame.
    ///
    /// Repeat traffic from an online host within one second is ignored to
    /// keep row locking off the hot path.
    pub fn notice(&self, host: &Arc<Host>) {
        let now = SystemTime::now();

        {
            let _row = host.mac_entry.row.read();
            let st = host.state.read();
            if st.online && !st.dirty {
                let recent = now
                    .duration_since(st.last_seen)
                    .map(|d| d < LAST_SEEN_GRANULARITY)
                    .unwrap_or(true);
                if recent {
                    return;
                }
            }
        }

        let mut offline_notes = Vec::new();
        let online_note;
        {
            let mut row = host.mac_entry.row.write();

            let transitioning = {
                let st = host.state.read();
                !st.online || st.dirty
            };

            // One device holds one active IPv4: a new IPv4 coming online
            // forces any sibling IPv4 offline.
            if transitioning && host.addr.ip.is_ipv4() {
                for other in &row.hosts {
                    if Arc::ptr_eq(other, host) || !other.addr.ip.is_ipv4() {
                        continue;
                    }
                    let mut ost = other.state.write();
                    if ost.online {
                        ost.online = false;
                        ost.dirty = false;
                        offline_notes.push(Self::to_notification(other, &row, false));
                    }
                }
            }

            let mut st = host.state.write();
            st.last_seen = now;
            if !st.online || st.dirty {
                st.online = true;
                st.dirty = false;
                row.online = true;
                online_note = Some(Self::to_notification(host, &row, true));
            } else {
                online_note = None;
            }
        }

        for n in offline_notes {
            self.notifier.send(n);
        }
        if let Some(n) = online_note {
            self.notifier.send(n);
        }
    }

    /// Transition the host offline and notify once. No-op if already offline.
    pub fn set_offline(&self, host: &Arc<Host>) {
        let note;
        {
            let mut row = host.mac_entry.row.write();
            {
                let mut st = host.state.write();
                if !st.online {
                    return;
                }
                st.online = false;
                st.dirty = false;
            }
            let online = row.hosts.iter().any(|h| h.state.read().online);
            row.online = online;
            note = Self::to_notification(host, &row, false);
        }
        self.notifier.send(note);
    }

    // ----- notifications --------------------------------------------------

    /// Obtain the notification receiver. With `snapshot`, the queue is
    /// pre-seeded with one event per host currently in the table.
    pub fn subscribe(&self, snapshot: bool) -> crate::notify::NotificationReceiver {
        if snapshot {
            let notes: Vec<Notification> = {
                let tables = self.tables.read();
                tables
                    .hosts
                    .values()
                    .map(|host| {
                        let row = host.mac_entry.row.read();
                        let online = host.state.read().online;
                        Self::to_notification(host, &row, online)
                    })
                    .collect()
            };
            for n in notes {
                self.notifier.send(n);
            }
        }
        self.notifier.receiver()
    }

    /// Notifications lost to channel overflow.
    pub fn dropped_notifications(&self) -> u64 {
        self.notifier.dropped()
    }

    // ----- probe / purge --------------------------------------------------

    /// The minute job: probe quiet hosts, offline silent ones, delete dead
    /// ones. `now` is a parameter so tests can drive time.
    pub fn purge(&self, now: SystemTime) {
        let probe_cutoff = now - self.probe_deadline;
        let offline_cutoff = now - self.offline_deadline;
        let delete_cutoff = now - self.purge_deadline;

        let mut purge: Vec<IpAddr> = Vec::with_capacity(16);
        let mut probe: Vec<Addr> = Vec::with_capacity(16);
        let mut offline: Vec<Arc<Host>> = Vec::with_capacity(16);

        for host in self.hosts() {
            let _row = host.mac_entry.row.read();
            let st = host.state.read();

            if !st.online && st.last_seen < delete_cutoff {
                purge.push(host.addr.ip);
                continue;
            }
            if st.online && st.last_seen < probe_cutoff {
                probe.push(host.addr);
            }
            if st.online && st.last_seen < offline_cutoff {
                offline.push(host.clone());
            }
        }

        // Probing does I/O; run detached with no table lock held.
        if !probe.is_empty() {
            self.spawn_probes(probe);
        }

        for host in offline {
            self.set_offline(&host);
        }

        if !purge.is_empty() {
            let mut tables = self.tables.write();
            for ip in purge {
                debug!(%ip, "purging host");
                tables.delete_host(ip);
            }
        }
    }

    fn spawn_probes(&self, targets: Vec<Addr>) {
        let conn = self.conn.clone();
        let host_mac = self.nic_info.host_addr4.mac;
        let host_ip4 = self.nic_info.host_addr4.ip4();
        let host_lla = self.nic_info.host_lla;
        tokio::spawn(async move {
            for addr in targets {
                let frame = match addr.ip {
                    IpAddr::V4(ip) => {
                        let Some(src_ip) = host_ip4 else { continue };
                        arp::request_frame(host_mac, src_ip, ip)
                    }
                    IpAddr::V6(ip) => {
                        let Some(src_lla) = host_lla else {
                            warn!(%addr, "cannot probe ipv6 host: no link-local address");
                            continue;
                        };
                        if ip.segments()[0] == 0xfe80 {
                            // NS almost always draws a response from an
                            // online host; echo is for global addresses.
                            icmp6::neighbor_solicitation_frame(host_mac, &src_lla, &ip)
                        } else {
                            let seq = 0;
                            icmp6::echo_request_frame(
                                host_mac, &src_lla, addr.mac, &ip, 0x4c48, seq,
                            )
                        }
                    }
                };
                if let Err(e) = conn.write_frame(&frame) {
                    debug!(%addr, "probe send failed: {e}");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanhound_core::BufferConn;
    use lanhound_packet::{ArpPacket, EthernetFrame};
    use std::net::Ipv4Addr;

    fn test_nic() -> NicInfo {
        NicInfo {
            name: "test0".to_string(),
            host_addr4: Addr::new(
                MacAddr([0x02, 0x02, 0x02, 0x02, 0x02, 0x02]),
                IpAddr::V4(Ipv4Addr::new(192, 168, 0, 129)),
            ),
            router_addr4: Addr::new(
                MacAddr([0x01, 0x01, 0x01, 0x01, 0x01, 0x01]),
                IpAddr::V4(Ipv4Addr::new(192, 168, 0, 11)),
            ),
            home_lan4: "192.168.0.0/24".parse().unwrap(),
            host_lla: Some("fe80::2".parse().unwrap()),
        }
    }

    fn test_session() -> (Arc<Session>, Arc<BufferConn>) {
        let conn = Arc::new(BufferConn::new());
        let session = Session::new(SessionConfig::new(conn.clone(), test_nic())).unwrap();
        (session, conn)
    }

    fn addr(mac: u8, ip: [u8; 4]) -> Addr {
        Addr::new(
            MacAddr([0, 0, 0, 0, 0, mac]),
            IpAddr::V4(Ipv4Addr::from(ip)),
        )
    }

    #[test]
    fn test_config_deadline_validation() {
        let nic = test_nic();
        let conn: Arc<dyn PacketConn> = Arc::new(BufferConn::new());

        let mut config = SessionConfig::new(conn.clone(), nic.clone());
        config.probe_deadline = Duration::ZERO;
        assert!(Session::new(config).is_err());

        let mut config = SessionConfig::new(conn.clone(), nic.clone());
        config.offline_deadline = config.probe_deadline; // must exceed probe
        assert!(Session::new(config).is_err());

        let mut config = SessionConfig::new(conn.clone(), nic.clone());
        config.purge_deadline = Duration::from_secs(60 * 60 * 25); // over 24h
        assert!(Session::new(config).is_err());

        assert!(Session::new(SessionConfig::new(conn, nic)).is_ok());
    }

    #[test]
    fn test_pinned_entries() {
        let (session, _conn) = test_session();
        let host = session
            .find_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 129)))
            .unwrap();
        assert!(host.state.read().online);
        assert!(host.state.read().last_seen > SystemTime::now());

        let router = session
            .find_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 11)))
            .unwrap();
        assert!(router.mac_entry.row.read().is_router);
        assert!(router.state.read().online);
    }

    #[test]
    fn test_notice_online_transition_once() {
        let (session, _conn) = test_session();
        let mut rx = session.subscribe(false);

        let (host, _) = session
            .find_or_create_host(addr(1, [192, 168, 0, 50]))
            .unwrap();
        session.notice(&host);

        let n = rx.try_recv().unwrap();
        assert!(n.online);
        assert_eq!(n.addr, host.addr);
        assert!(host.state.read().online);
        assert!(host.mac_entry.row.read().online);

        // traffic a moment later is suppressed
        session.notice(&host);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_offline_transition_once() {
        let (session, _conn) = test_session();
        let (host, _) = session
            .find_or_create_host(addr(1, [192, 168, 0, 50]))
            .unwrap();
        session.notice(&host);
        let mut rx = session.subscribe(false);

        session.set_offline(&host);
        let n = rx.try_recv().unwrap();
        assert!(!n.online);
        assert!(!host.mac_entry.row.read().online);

        // second call emits nothing
        session.set_offline(&host);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_dup_ip_same_mac_forces_offline() {
        let (session, _conn) = test_session();
        let (first, _) = session
            .find_or_create_host(addr(4, [192, 168, 0, 10]))
            .unwrap();
        session.notice(&first);

        let mut rx = session.subscribe(false);
        let (second, _) = session
            .find_or_create_host(addr(4, [192, 168, 0, 11]))
            .unwrap();
        session.notice(&second);

        // exactly one offline for .10 then one online for .11
        let n1 = rx.try_recv().unwrap();
        assert!(!n1.online);
        assert_eq!(n1.addr.ip, IpAddr::V4(Ipv4Addr::new(192, 168, 0, 10)));
        let n2 = rx.try_recv().unwrap();
        assert!(n2.online);
        assert_eq!(n2.addr.ip, IpAddr::V4(Ipv4Addr::new(192, 168, 0, 11)));
        assert!(rx.try_recv().is_none());

        assert!(!first.state.read().online);
        assert!(second.state.read().online);
        assert!(session.find_mac(first.addr.mac).unwrap().row.read().online);
    }

    #[test]
    fn test_mac_online_reflects_hosts() {
        let (session, _conn) = test_session();
        let (h1, _) = session
            .find_or_create_host(addr(5, [192, 168, 0, 20]))
            .unwrap();
        session.notice(&h1);
        assert!(session.find_mac(h1.addr.mac).unwrap().row.read().online);

        session.set_offline(&h1);
        assert!(!session.find_mac(h1.addr.mac).unwrap().row.read().online);
    }

    #[test]
    fn test_capture_and_release() {
        let (session, _conn) = test_session();
        let mac = MacAddr([0, 0, 0, 0, 0, 9]);
        assert!(!session.is_captured(mac));

        session.capture(mac).unwrap();
        assert!(session.is_captured(mac));
        // idempotent
        session.capture(mac).unwrap();

        session.release(mac).unwrap();
        assert!(!session.is_captured(mac));

        // the gateway cannot be captured
        let gw_mac = session.nic_info.router_addr4.mac;
        assert!(matches!(session.capture(gw_mac), Err(Error::IsRouter)));
    }

    #[test]
    fn test_dhcp_update_sets_name_and_online() {
        let (session, _conn) = test_session();
        let mut rx = session.subscribe(false);
        let mac = MacAddr([0, 0, 0, 0, 0, 3]);
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 77));

        let host = session
            .dhcp_update(mac, ip, NameEntry::new("laptop", "dhcp"))
            .unwrap();
        assert!(host.state.read().online);
        assert_eq!(host.mac_entry.row.read().dhcp4_name.name, "laptop");

        let n = rx.try_recv().unwrap();
        assert!(n.online);
        assert_eq!(n.dhcp4_name, "laptop");

        // zero IP rejected
        assert!(session
            .dhcp_update(mac, IpAddr::V4(Ipv4Addr::UNSPECIFIED), NameEntry::default())
            .is_err());
    }

    #[test]
    fn test_ip4_offer_roundtrip() {
        let (session, _conn) = test_session();
        let mac = MacAddr([0, 0, 0, 0, 0, 8]);
        assert!(session.ip4_offer(mac).is_none());
        session.set_ip4_offer(mac, Ipv4Addr::new(192, 168, 0, 42), NameEntry::default());
        assert_eq!(session.ip4_offer(mac), Some(Ipv4Addr::new(192, 168, 0, 42)));
    }

    #[test]
    fn test_subscribe_snapshot_replays_hosts() {
        let (session, _conn) = test_session();
        let (host, _) = session
            .find_or_create_host(addr(1, [192, 168, 0, 50]))
            .unwrap();
        session.notice(&host);

        let mut rx = session.subscribe(true);
        let mut seen = 0;
        while rx.try_recv().is_some() {
            seen += 1;
        }
        // two pinned entries plus the created host
        assert_eq!(seen, 3);
    }

    #[tokio::test]
    async fn test_purge_lifecycle() {
        let (session, conn) = test_session();
        let t0 = SystemTime::now();

        let (host, _) = session
            .find_or_create_host(addr(1, [192, 168, 0, 200]))
            .unwrap();
        session.notice(&host);
        host.state.write().last_seen = t0;
        let mut rx = session.subscribe(false);

        // probe window: ARP request goes out, host stays online
        session.purge(t0 + session.probe_deadline + Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = conn.take_sent();
        assert_eq!(sent.len(), 1);
        let eth = EthernetFrame::new(&sent[0]).unwrap();
        let arp = ArpPacket::new(eth.payload()).unwrap();
        assert_eq!(arp.target_ip(), Ipv4Addr::new(192, 168, 0, 200));
        assert!(host.state.read().online);

        // offline window: one offline notification
        session.purge(t0 + session.offline_deadline + Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let n = rx.try_recv().unwrap();
        assert!(!n.online);
        assert!(!host.state.read().online);

        // purge window: host deleted
        session.purge(t0 + session.purge_deadline + Duration::from_secs(1));
        assert!(session
            .find_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 200)))
            .is_none());
        // pinned entries survive
        assert!(session
            .find_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 129)))
            .is_some());
    }

    #[tokio::test]
    async fn test_ipv6_probe_uses_neighbor_solicitation() {
        let (session, conn) = test_session();
        let t0 = SystemTime::now();
        let lla: std::net::Ipv6Addr = "fe80::aabb:1".parse().unwrap();
        let (host, _) = session
            .find_or_create_host(Addr::new(MacAddr([0, 0, 0, 0, 0, 6]), IpAddr::V6(lla)))
            .unwrap();
        session.notice(&host);
        host.state.write().last_seen = t0;

        session.purge(t0 + session.probe_deadline + Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = conn.take_sent();
        assert_eq!(sent.len(), 1);
        let eth = EthernetFrame::new(&sent[0]).unwrap();
        assert_eq!(eth.ethertype(), lanhound_core::ethertypes::IPV6);
        // hop limit 255, NS type
        assert_eq!(eth.payload()[7], 255);
        assert_eq!(eth.payload()[40], 135);
    }

    #[tokio::test]
    async fn test_nic_monitor_fatal_on_silence() {
        let conn = Arc::new(BufferConn::new());
        let mut config = SessionConfig::new(conn.clone(), test_nic());
        config.monitor_frequency = Duration::from_millis(50);
        let session = Session::start(config).unwrap();

        assert!(!session.is_fatal());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(session.is_fatal());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_nic_monitor_survives_with_heartbeat() {
        let conn = Arc::new(BufferConn::new());
        let mut config = SessionConfig::new(conn.clone(), test_nic());
        config.monitor_frequency = Duration::from_millis(50);
        let session = Session::start(config).unwrap();

        for _ in 0..4 {
            session.mark_ip_heartbeat();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        assert!(!session.is_fatal());
        session.close();
    }
}
