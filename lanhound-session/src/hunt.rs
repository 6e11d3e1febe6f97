//! Hunt handler trait
//!
//! Each protocol handler that participates in capturing a host implements
//! [`Hunter`]. The capture controller fans `start_hunt`/`stop_hunt` out to
//! every handler for the address family; `check_addr` reports the stage a
//! handler currently attributes to the address.

use async_trait::async_trait;
use lanhound_core::{Addr, HuntStage, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Sleep up to `duration`, waking early once `stop` is set. Hunt loops use
/// this so stop-hunt takes effect promptly instead of after a full
/// re-advertisement interval.
pub async fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) {
    let step = Duration::from_millis(50);
    let mut remaining = duration;
    while !stop.load(Ordering::Acquire) && !remaining.is_zero() {
        let nap = step.min(remaining);
        tokio::time::sleep(nap).await;
        remaining -= nap;
    }
}

#[async_trait]
pub trait Hunter: Send + Sync {
    /// Begin hunting the address; returns the stage the handler reached.
    async fn start_hunt(&self, addr: Addr) -> Result<HuntStage>;

    /// Stop hunting the address.
    async fn stop_hunt(&self, addr: Addr) -> Result<HuntStage>;

    /// Current stage for the address, without side effects.
    async fn check_addr(&self, addr: Addr) -> Result<HuntStage>;
}
