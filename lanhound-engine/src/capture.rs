//! Capture controller
//!
//! `capture(mac)` flags the device and fans start-hunt out to the ARP,
//! ICMPv4, ICMPv6 and DHCPv4 handlers for every address the device owns;
//! `release(mac)` undoes it. Per-host progress lives in the session's
//! `HuntStage`: handlers move a host from `Hunt` to `Redirected` once return
//! traffic is confirmed flowing through us.

use crate::engine::Engine;
use lanhound_core::{Addr, HuntStage, MacAddr, Result};
use lanhound_session::Hunter;
use std::net::IpAddr;
use tracing::{debug, info, warn};

impl Engine {
    /// Place a MAC in capture mode and begin hunting all its addresses.
    /// Fails with `IsRouter` for the gateway.
    pub async fn capture(&self, mac: MacAddr) -> Result<()> {
        self.session.capture(mac)?;
        info!(%mac, "capture started");
        for addr in self.session.ip_addrs(mac) {
            if let Err(e) = self.start_hunt(addr).await {
                warn!(%addr, "hunt start failed: {e}");
            }
        }
        Ok(())
    }

    /// Take a MAC out of capture mode and stop hunting its addresses.
    pub async fn release(&self, mac: MacAddr) -> Result<()> {
        self.session.release(mac)?;
        info!(%mac, "capture released");
        for addr in self.session.ip_addrs(mac) {
            if let Err(e) = self.stop_hunt(addr).await {
                warn!(%addr, "hunt stop failed: {e}");
            }
        }
        Ok(())
    }

    pub(crate) async fn start_hunt(&self, addr: Addr) -> Result<()> {
        if addr.ip.is_ipv4()
            && self.icmp4.check_addr(addr).await? == HuntStage::Redirected
        {
            debug!(%addr, "already redirected");
            return Ok(());
        }
        self.session.set_hunt_stage(addr.ip, HuntStage::Hunt);

        match addr.ip {
            IpAddr::V4(_) => {
                self.arp.start_hunt(addr).await?;
                self.icmp4.start_hunt(addr).await?;
                self.dhcp4.start_hunt(addr).await?;
            }
            IpAddr::V6(_) => {
                self.icmp6.start_hunt(addr).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn stop_hunt(&self, addr: Addr) -> Result<()> {
        self.session.set_hunt_stage(addr.ip, HuntStage::Normal);
        match addr.ip {
            IpAddr::V4(_) => {
                // stop in the reverse order of start; the dhcp handler only
                // reports, so a missing lease is not an error here
                if let Err(e) = self.dhcp4.stop_hunt(addr).await {
                    debug!(%addr, "dhcp4 stop hunt: {e}");
                }
                self.icmp4.stop_hunt(addr).await?;
                self.arp.stop_hunt(addr).await?;
            }
            IpAddr::V6(_) => {
                self.icmp6.stop_hunt(addr).await?;
            }
        }
        Ok(())
    }
}
