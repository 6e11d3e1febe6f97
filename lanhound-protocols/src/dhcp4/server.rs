//! DHCPv4 handler: RFC 2131 server state machine over two subnets
//!
//! All message handling runs under one handler mutex. Handlers return an
//! optional reply frame plus a host-update descriptor the dispatcher applies
//! to the session table; they never send from within the lock except through
//! detached attacker tasks.

use super::attack;
use super::lease::{self, LeaseState, LeaseTable, SubnetSel};
use super::options::{
    option_ip4, Options, OPTION_CLIENT_ID, OPTION_HOST_NAME, OPTION_PARAMETER_REQUEST_LIST,
    OPTION_REQUESTED_IP, OPTION_SERVER_ID,
};
use super::packet::{reply_packet, Dhcp4, MessageType};
use super::subnet::{Subnet, SubnetConfig, DEFAULT_LEASE_DURATION};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use ipnetwork::Ipv4Network;
use lanhound_core::{
    wellknown, Addr, Error, HuntStage, MacAddr, NameEntry, PacketConn, Result,
};
use lanhound_packet::{EthernetFrame, Ipv4Packet, UdpPacket};
use lanhound_session::{Hunter, Session};
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// DNS handed to captured clients on the netfilter subnet: the CloudFlare
/// family resolver, so redirected hosts keep resolving even before the NAT
/// rules intercept DNS.
const NETFILTER_DNS: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 3);

/// Attack policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Behave as the only DHCP server on the LAN
    PrimaryServer,
    /// Compete with the LAN's real server for every client
    SecondaryServer,
    /// Compete only for captured clients
    SecondaryServerNice,
}

/// Handler construction parameters.
#[derive(Debug, Clone)]
pub struct Dhcp4Config {
    /// The netfilter /24; its address is the local NAT gateway and must sit
    /// inside the home LAN so clients can reach it
    pub netfilter_lan: Ipv4Network,
    /// Home-subnet DNS; the router when unset
    pub dns_server: Option<Ipv4Addr>,
    pub lease_filename: PathBuf,
    pub mode: Mode,
    pub lease_duration: Duration,
}

impl Dhcp4Config {
    pub fn new(netfilter_lan: Ipv4Network, lease_filename: impl Into<PathBuf>) -> Self {
        Self {
            netfilter_lan,
            dns_server: None,
            lease_filename: lease_filename.into(),
            mode: Mode::SecondaryServerNice,
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }
}

/// What a DHCP exchange taught us about a host; the dispatcher folds it
/// into the session table.
#[derive(Debug, Clone, PartialEq)]
pub struct Dhcp4Update {
    pub addr: Addr,
    pub name: NameEntry,
    /// The exchange almost always reveals a live binding the table does not
    /// have yet (reboots, foreign-server selects)
    pub new_host: bool,
    pub hunt_stage: HuntStage,
}

impl Dhcp4Update {
    fn new(mac: MacAddr, ip: Ipv4Addr, name: &str, hunt_stage: HuntStage) -> Self {
        Self {
            addr: Addr::new(mac, IpAddr::V4(ip)),
            name: NameEntry::new(name, "dhcp4"),
            new_host: true,
            hunt_stage,
        }
    }
}

/// REQUEST operation per RFC 2131 §4.3.2, computed once from the
/// (server-id, requested-ip, ciaddr, sender) tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestOp {
    Selecting,
    Renewing,
    Rebinding,
    Rebooting,
}

struct HandlerState {
    table: LeaseTable,
    home: Subnet,
    netfilter: Subnet,
}

impl HandlerState {
    fn subnet(&self, sel: SubnetSel) -> &Subnet {
        match sel {
            SubnetSel::Home => &self.home,
            SubnetSel::Netfilter => &self.netfilter,
        }
    }
}

/// The DHCPv4 handler.
pub struct Dhcp4Handler {
    session: Arc<Session>,
    mode: RwLock<Mode>,
    filename: PathBuf,
    state: Mutex<HandlerState>,
    /// Last competing server seen answering on the client port
    competing_server: RwLock<Option<Ipv4Addr>>,
}

impl Dhcp4Handler {
    /// Build the handler with its two subnets, restoring the lease table
    /// from disk when the stored subnet parameters still match.
    pub fn new(session: Arc<Session>, config: Dhcp4Config) -> Result<Arc<Self>> {
        let nic = &session.nic_info;
        let host_ip = nic
            .host_addr4
            .ip4()
            .ok_or_else(|| Error::InvalidIp(nic.host_addr4.ip.to_string()))?;
        let router_ip = nic
            .router_addr4
            .ip4()
            .ok_or_else(|| Error::InvalidIp(nic.router_addr4.ip.to_string()))?;

        let netfilter_gw = config.netfilter_lan.ip();
        if !nic.home_lan4.contains(netfilter_gw) {
            return Err(Error::invalid_parameter(
                "netfilter_lan",
                "netfilter gateway must sit inside the home LAN",
            ));
        }
        if config.netfilter_lan.contains(host_ip) || config.netfilter_lan.contains(router_ip) {
            return Err(Error::invalid_parameter(
                "netfilter_lan",
                "netfilter LAN must be disjoint from the home LAN",
            ));
        }

        let home_config = SubnetConfig {
            lan: nic.home_lan4,
            default_gw: router_ip,
            dhcp_server: host_ip,
            dns_server: config.dns_server.unwrap_or(router_ip),
            duration: config.lease_duration,
            stage: HuntStage::Normal,
            first_ip: None,
            last_ip: None,
        };
        let netfilter_config = SubnetConfig {
            lan: Ipv4Network::new(
                config.netfilter_lan.network(),
                config.netfilter_lan.prefix(),
            )
            .map_err(|e| Error::invalid_parameter("netfilter_lan", e.to_string()))?,
            default_gw: netfilter_gw,
            dhcp_server: host_ip,
            dns_server: NETFILTER_DNS,
            duration: config.lease_duration,
            stage: HuntStage::Redirected,
            first_ip: None,
            last_ip: None,
        };

        // Reuse stored leases only while the subnet parameters are unchanged
        let table = match lease::load(&config.lease_filename) {
            Some(file) if file.home == home_config && file.netfilter == netfilter_config => {
                info!(leases = file.leases.len(), "restored lease table");
                lease::table_from_leases(file.leases)
            }
            Some(_) => {
                info!("subnet parameters changed, resetting lease table");
                LeaseTable::new()
            }
            None => LeaseTable::new(),
        };

        let home = Subnet::new(home_config)?;
        let mut netfilter = Subnet::new(netfilter_config)?;
        // captured clients route the home LAN and their default through the
        // netfilter gateway
        netfilter.append_route_options(router_ip, nic.home_lan4, netfilter_gw);

        let handler = Arc::new(Self {
            session,
            mode: RwLock::new(config.mode),
            filename: config.lease_filename,
            state: Mutex::new(HandlerState {
                table,
                home,
                netfilter,
            }),
            competing_server: RwLock::new(None),
        });

        {
            let state = handler.state.try_lock().expect("no contention at build");
            handler.save(&state);
        }
        Ok(handler)
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.write() = mode;
    }

    /// Competing DHCP server observed on the client port, if any.
    pub fn competing_server(&self) -> Option<Ipv4Addr> {
        *self.competing_server.read()
    }

    fn adversarial(&self, captured: bool) -> bool {
        match self.mode() {
            Mode::PrimaryServer => false,
            Mode::SecondaryServer => true,
            Mode::SecondaryServerNice => captured,
        }
    }

    fn save(&self, state: &HandlerState) {
        self.persist(&state.home.config, &state.netfilter.config, &state.table);
    }

    fn persist(&self, home: &SubnetConfig, netfilter: &SubnetConfig, table: &LeaseTable) {
        if let Err(e) = lease::save(&self.filename, home, netfilter, table) {
            warn!(path = %self.filename.display(), "lease save failed: {e}");
        }
    }

    /// Expiry sweep; wire this to the engine's minute ticker.
    pub async fn minute_ticker(&self) {
        let mut state = self.state.lock().await;
        if state.table.free_expired(Utc::now()) > 0 {
            self.save(&state);
        }
    }

    /// Snapshot of the lease table, for inspection and tests.
    pub async fn leases(&self) -> Vec<super::lease::Lease> {
        let state = self.state.lock().await;
        state.table.iter().cloned().collect()
    }

    /// Process one received Ethernet frame carrying DHCP. Returns the host
    /// update the dispatcher should apply, if any.
    pub async fn process_frame(&self, frame: &[u8]) -> Result<Option<Dhcp4Update>> {
        let eth = EthernetFrame::new(frame)?;
        let ip4 = Ipv4Packet::new(eth.payload())?;
        let udp = UdpPacket::new(ip4.payload())?;

        if udp.dst_port() == wellknown::DHCP4_CLIENT_PORT {
            self.process_client_packet(udp.payload());
            return Ok(None);
        }
        if udp.dst_port() != wellknown::DHCP4_SERVER_PORT {
            return Ok(None);
        }

        let dhcp = Dhcp4::new(udp.payload())?;
        let options = dhcp.parse_options();
        let Some(mt) = dhcp.message_type() else {
            return Err(Error::invalid_frame("dhcp message type missing"));
        };

        let (update, reply) = {
            let mut state = self.state.lock().await;
            match mt {
                MessageType::Discover => self.handle_discover(&mut state, dhcp, &options),
                MessageType::Request => {
                    self.handle_request(&mut state, dhcp, &options, ip4.src())
                }
                MessageType::Decline => (self.handle_decline(&mut state, dhcp, &options), None),
                MessageType::Release => (self.handle_release(&mut state, dhcp, &options), None),
                MessageType::Inform => self.handle_inform(&mut state, dhcp, &options),
                MessageType::Offer | MessageType::Ack | MessageType::Nak => {
                    warn!(%mt, "server message on the server port");
                    (None, None)
                }
            }
        };

        if let Some(reply) = reply {
            let (dst_mac, dst_ip) = if ip4.src().is_unspecified() || dhcp.broadcast() {
                (MacAddr::broadcast(), wellknown::IP4_BROADCAST)
            } else {
                (eth.src(), ip4.src())
            };
            let nic = &self.session.nic_info;
            let src_ip = nic.host_addr4.ip4().expect("validated at build");
            let frame = super::dhcp_frame(
                nic.host_addr4.mac,
                dst_mac,
                src_ip,
                dst_ip,
                wellknown::DHCP4_SERVER_PORT,
                wellknown::DHCP4_CLIENT_PORT,
                &reply,
            );
            self.session.conn().write_frame(&frame)?;
        }
        Ok(update)
    }

    /// Traffic to the client port: track a competing server answering
    /// alongside us.
    fn process_client_packet(&self, payload: &[u8]) {
        let Ok(dhcp) = Dhcp4::new(payload) else {
            return;
        };
        let options = dhcp.parse_options();
        match dhcp.message_type() {
            Some(MessageType::Offer) | Some(MessageType::Ack) => {
                let Some(server) = options.get(&OPTION_SERVER_ID).and_then(|v| option_ip4(v))
                else {
                    return;
                };
                let ours = self
                    .session
                    .nic_info
                    .host_addr4
                    .ip4()
                    .expect("validated at build");
                if server != ours {
                    debug!(%server, "competing dhcp server answering");
                    *self.competing_server.write() = Some(server);
                }
            }
            _ => {}
        }
    }

    fn client_id(dhcp: Dhcp4, options: &Options) -> Vec<u8> {
        match options.get(&OPTION_CLIENT_ID) {
            Some(id) if !id.is_empty() => id.to_vec(),
            _ => dhcp.chaddr().as_bytes().to_vec(),
        }
    }

    fn host_name(options: &Options) -> String {
        options
            .get(&OPTION_HOST_NAME)
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default()
    }

    fn handle_discover(
        &self,
        state: &mut HandlerState,
        req: Dhcp4,
        options: &Options,
    ) -> (Option<Dhcp4Update>, Option<Vec<u8>>) {
        let mac = req.chaddr();
        let client_id = Self::client_id(req, options);
        let name = Self::host_name(options);

        let captured = self.session.is_captured(mac);
        let sel = if captured {
            SubnetSel::Netfilter
        } else {
            SubnetSel::Home
        };

        let HandlerState {
            table,
            home,
            netfilter,
        } = state;
        let subnet = match sel {
            SubnetSel::Home => &*home,
            SubnetSel::Netfilter => &*netfilter,
        };

        table.find_or_create(&client_id, mac, &name, sel);
        let offer_ip = match table.allocate(&client_id, subnet) {
            Ok(ip) => ip,
            Err(Error::Exhausted) => {
                // no OFFER; the client retries and may land after an expiry
                warn!(%mac, subnet = ?sel, "no free ip, discover ignored");
                return (None, None);
            }
            Err(e) => {
                warn!(%mac, "discover failed: {e}");
                return (None, None);
            }
        };

        let lease = table.find_mut(&client_id).expect("created above");
        lease.state = LeaseState::Discover;
        lease.ip_offer = Some(offer_ip);
        lease.xid = req.xid();

        info!(%mac, ip = %offer_ip, name = %lease.name, subnet = ?sel, "discover, offering");

        let prl = options.get(&OPTION_PARAMETER_REQUEST_LIST).copied();
        let opts = subnet.options.select_order_or_all(prl);
        let reply = reply_packet(
            req,
            MessageType::Offer,
            subnet.config.dhcp_server,
            offer_ip,
            subnet.duration_secs(),
            &opts,
        );

        // let ARP recognize the pending binding
        self.session
            .set_ip4_offer(mac, offer_ip, NameEntry::new(lease.name.clone(), "dhcp4"));

        (None, Some(reply))
    }

    fn handle_request(
        &self,
        state: &mut HandlerState,
        req: Dhcp4,
        options: &Options,
        sender_ip: Ipv4Addr,
    ) -> (Option<Dhcp4Update>, Option<Vec<u8>>) {
        let mac = req.chaddr();
        let client_id = Self::client_id(req, options);
        let name = Self::host_name(options);

        let req_ip_opt = options.get(&OPTION_REQUESTED_IP).and_then(|v| option_ip4(v));
        let server_id = options.get(&OPTION_SERVER_ID).and_then(|v| option_ip4(v));

        // RFC 2131 §4.3.2 operation table:
        //  server-id set                        -> selecting
        //  requested-ip unset, sender unicast   -> renewing   (ip = ciaddr)
        //  requested-ip unset, sender broadcast -> rebinding  (ip = ciaddr)
        //  requested-ip set, no server-id       -> rebooting
        let (operation, req_ip) = match (server_id, req_ip_opt) {
            (Some(_), ip) => (RequestOp::Selecting, ip.unwrap_or_else(|| req.ciaddr())),
            (None, None) if sender_ip != wellknown::IP4_BROADCAST => {
                (RequestOp::Renewing, req.ciaddr())
            }
            (None, None) => (RequestOp::Rebinding, req.ciaddr()),
            (None, Some(ip)) => (RequestOp::Rebooting, ip),
        };

        if req_ip.is_unspecified() {
            debug!(%mac, ?operation, "request without an ip, ignored");
            return (None, None);
        }

        let captured = self.session.is_captured(mac);
        let sel = if captured {
            SubnetSel::Netfilter
        } else {
            SubnetSel::Home
        };
        let HandlerState {
            table,
            home,
            netfilter,
        } = state;
        let subnet = match sel {
            SubnetSel::Home => &*home,
            SubnetSel::Netfilter => &*netfilter,
        };

        let lease = table.find_or_create(&client_id, mac, &name, sel);

        let nak = |server: Ipv4Addr| {
            Some(reply_packet(
                req,
                MessageType::Nak,
                server,
                Ipv4Addr::UNSPECIFIED,
                0,
                &[],
            ))
        };

        match operation {
            RequestOp::Selecting => {
                if server_id != Some(subnet.config.dhcp_server) {
                    // The client chose the other server. Keep Discover state
                    // in case a second request follows; otherwise free it.
                    if lease.state != LeaseState::Discover {
                        lease.reset();
                    }
                    let update =
                        Dhcp4Update::new(mac, req_ip, &name, HuntStage::NoChange);
                    if self.adversarial(captured) {
                        info!(%mac, server = ?server_id, "select for another server, naking");
                        return (Some(update), nak(subnet.config.dhcp_server));
                    }
                    debug!(%mac, server = ?server_id, "select for another server, ignored");
                    return (Some(update), None);
                }

                let valid = lease.mac == mac
                    && match lease.state {
                        LeaseState::Discover => {
                            lease.xid == req.xid() && lease.ip_offer == Some(req_ip)
                        }
                        // some clients re-select after the ack; let it pass
                        LeaseState::Allocated => lease.ip == Some(req_ip),
                        LeaseState::Free => false,
                    };
                if !valid {
                    info!(%mac, ip = %req_ip, state = ?lease.state, "select mismatch, naking");
                    return (None, nak(subnet.config.dhcp_server));
                }
            }

            RequestOp::Renewing => {
                let valid = lease.state == LeaseState::Allocated
                    && lease.mac == mac
                    && lease.ip == Some(req_ip)
                    && !lease.is_expired(Utc::now());
                if !valid {
                    info!(%mac, ip = %req_ip, "renew of invalid or expired lease, naking");
                    return (None, nak(subnet.config.dhcp_server));
                }
            }

            RequestOp::Rebinding | RequestOp::Rebooting => {
                // Common when a device rejoins the network claiming its old
                // IP without a fresh discover; almost always a host the
                // table has not seen yet.
                let update = Dhcp4Update::new(mac, req_ip, &name, HuntStage::NoChange);

                if lease.state == LeaseState::Free {
                    info!(%mac, ip = %req_ip, ?operation, "no lease on record, naking");
                    if self.adversarial(captured) {
                        // DECLINE rather than RELEASE: the competing server
                        // keeps NAK-ing the client afterwards, which drives
                        // it back to discover.
                        attack::spawn_force_decline(
                            self.session.conn(),
                            self.session.nic_info.router_addr4,
                            client_id.clone(),
                            mac,
                            req_ip,
                            Some(req.xid()),
                        );
                    }
                    return (Some(update), nak(subnet.config.dhcp_server));
                }

                let valid = lease.state == LeaseState::Allocated
                    && lease.mac == mac
                    && lease.ip == Some(req_ip)
                    && subnet.contains(req_ip);
                if !valid {
                    info!(%mac, ip = %req_ip, ?operation, "lease mismatch, naking");
                    if self.adversarial(captured) {
                        attack::spawn_force_decline(
                            self.session.conn(),
                            self.session.nic_info.router_addr4,
                            client_id.clone(),
                            mac,
                            req_ip,
                            Some(req.xid()),
                        );
                    }
                    return (Some(update), nak(subnet.config.dhcp_server));
                }
            }
        }

        // successful request: bind and ack
        if !name.is_empty() {
            lease.name = name.clone();
        }
        if lease.state == LeaseState::Discover {
            lease.ip = lease.ip_offer.take();
        }
        lease.state = LeaseState::Allocated;
        lease.expiry = Utc::now() + TimeDelta::seconds(subnet.duration_secs() as i64);
        lease.count = 0;
        let lease_ip = lease.ip.unwrap_or(req_ip);
        let lease_name = lease.name.clone();

        info!(%mac, ip = %lease_ip, ?operation, "request acked");

        let prl = options.get(&OPTION_PARAMETER_REQUEST_LIST).copied();
        let opts = subnet.options.select_order_or_all(prl);
        let reply = reply_packet(
            req,
            MessageType::Ack,
            subnet.config.dhcp_server,
            lease_ip,
            subnet.duration_secs(),
            &opts,
        );

        let update = Dhcp4Update::new(mac, lease_ip, &lease_name, subnet.stage());
        self.persist(&home.config, &netfilter.config, table);
        (Some(update), Some(reply))
    }

    fn handle_decline(
        &self,
        state: &mut HandlerState,
        req: Dhcp4,
        options: &Options,
    ) -> Option<Dhcp4Update> {
        let server_id = options.get(&OPTION_SERVER_ID).and_then(|v| option_ip4(v));
        if server_id != Some(state.home.config.dhcp_server) {
            return None;
        }
        let declined = options
            .get(&OPTION_REQUESTED_IP)
            .and_then(|v| option_ip4(v));
        let client_id = Self::client_id(req, options);

        let mut changed = false;
        if let Some(lease) = state.table.find_mut(&client_id) {
            if declined.is_some() && (lease.ip == declined || lease.ip_offer == declined) {
                info!(mac = %lease.mac, ip = ?declined, "client declined address");
                lease.reset();
                changed = true;
            }
        }
        if changed {
            self.save(state);
        }
        None
    }

    fn handle_release(
        &self,
        state: &mut HandlerState,
        req: Dhcp4,
        options: &Options,
    ) -> Option<Dhcp4Update> {
        let client_id = Self::client_id(req, options);
        let mac = req.chaddr();
        let mut changed = false;
        if let Some(lease) = state.table.find_mut(&client_id) {
            if lease.mac == mac && lease.ip == Some(req.ciaddr()) {
                info!(%mac, ip = %req.ciaddr(), "client released address");
                lease.reset();
                changed = true;
            }
        }
        if changed {
            self.save(state);
        }
        None
    }

    /// INFORM: the client configured its address elsewhere and only wants
    /// options. ACK without yiaddr or lease time.
    fn handle_inform(
        &self,
        state: &mut HandlerState,
        req: Dhcp4,
        options: &Options,
    ) -> (Option<Dhcp4Update>, Option<Vec<u8>>) {
        let mac = req.chaddr();
        let captured = self.session.is_captured(mac);
        let subnet = if captured {
            &state.netfilter
        } else {
            &state.home
        };

        let prl = options.get(&OPTION_PARAMETER_REQUEST_LIST).copied();
        let opts = subnet.options.select_order_or_all(prl);
        let reply = reply_packet(
            req,
            MessageType::Ack,
            subnet.config.dhcp_server,
            Ipv4Addr::UNSPECIFIED,
            0,
            &opts,
        );

        let update = if req.ciaddr().is_unspecified() {
            None
        } else {
            let name = Self::host_name(options);
            let mut update = Dhcp4Update::new(mac, req.ciaddr(), &name, HuntStage::NoChange);
            update.new_host = false;
            Some(update)
        };
        (update, Some(reply))
    }
}

#[async_trait]
impl Hunter for Dhcp4Handler {
    /// Start-hunt accelerates re-discover: fake a release so the real
    /// server lets go of the client's binding.
    async fn start_hunt(&self, addr: Addr) -> Result<HuntStage> {
        if let IpAddr::V4(ip) = addr.ip {
            let state = self.state.lock().await;
            if let Some(lease) = state.table.find_by_ip(ip) {
                if lease.state == LeaseState::Allocated
                    && lease.subnet != SubnetSel::Netfilter
                    && self.mode() != Mode::PrimaryServer
                {
                    attack::spawn_force_release(
                        self.session.conn(),
                        self.session.nic_info.router_addr4,
                        lease.client_id.clone(),
                        lease.mac,
                        ip,
                        None,
                    );
                }
            }
        }
        Ok(HuntStage::Hunt)
    }

    async fn stop_hunt(&self, addr: Addr) -> Result<HuntStage> {
        self.check_addr(addr).await
    }

    /// The stage the lease's subnet attributes to the address.
    async fn check_addr(&self, addr: Addr) -> Result<HuntStage> {
        let IpAddr::V4(ip) = addr.ip else {
            return Err(Error::NotFound(addr.ip.to_string()));
        };
        let state = self.state.lock().await;
        match state.table.find_by_ip(ip) {
            Some(lease) if lease.state == LeaseState::Allocated => {
                Ok(state.subnet(lease.subnet).stage())
            }
            _ => Err(Error::NotFound(ip.to_string())),
        }
    }
}
