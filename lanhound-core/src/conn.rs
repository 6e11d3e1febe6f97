//! Link-level transport
//!
//! The engine reads and writes whole Ethernet frames through a [`PacketConn`].
//! [`RawConn`] binds a promiscuous channel on a real NIC; [`BufferConn`] is an
//! in-memory implementation used by the tests and by offline processing.

use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use pnet_datalink::{self, Channel, DataLinkReceiver, DataLinkSender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Whole-frame read/write over one NIC.
///
/// `write_frame` must be safe for concurrent callers; implementations
/// serialize sends internally.
pub trait PacketConn: Send + Sync {
    /// Read the next Ethernet frame into `buf`, returning its length.
    /// Blocks until a frame arrives or the conn is closed.
    fn read_frame(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write a fully formed Ethernet frame.
    fn write_frame(&self, frame: &[u8]) -> Result<()>;

    /// Shut the conn; pending and future reads return [`Error::Closed`].
    fn close(&self);

    /// True once `close` has been called.
    fn is_closed(&self) -> bool;
}

/// Raw promiscuous Ethernet conn over `pnet_datalink`.
pub struct RawConn {
    tx: Mutex<Box<dyn DataLinkSender>>,
    rx: Mutex<Box<dyn DataLinkReceiver>>,
    closed: AtomicBool,
}

impl RawConn {
    /// Open a promiscuous channel on the named interface.
    ///
    /// The read timeout keeps `read_frame` responsive to `close`.
    pub fn open(interface: &str) -> Result<Self> {
        let iface = pnet_datalink::interfaces()
            .into_iter()
            .find(|i| i.name == interface)
            .ok_or_else(|| Error::InterfaceNotFound(interface.to_string()))?;

        let config = pnet_datalink::Config {
            promiscuous: true,
            read_timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        };

        let (tx, rx) = match pnet_datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err(Error::Interface("unsupported channel type".to_string())),
            Err(e) => return Err(Error::Interface(format!("failed to open channel: {e}"))),
        };

        Ok(Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        })
    }
}

impl PacketConn for RawConn {
    fn read_frame(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::Closed);
            }
            let mut rx = self.rx.lock();
            match rx.next() {
                Ok(frame) => {
                    let n = frame.len().min(buf.len());
                    buf[..n].copy_from_slice(&frame[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    debug!("raw conn read error: {e}");
                    return Err(Error::Io(e));
                }
            }
        }
    }

    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let mut tx = self.tx.lock();
        tx.send_to(frame, None)
            .ok_or_else(|| Error::Interface("send queue unavailable".to_string()))?
            .map_err(Error::Io)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// In-memory conn: injected frames are read back in order, written frames
/// are captured for inspection.
#[derive(Default)]
pub struct BufferConn {
    inbound: Mutex<VecDeque<Vec<u8>>>,
    readable: Condvar,
    sent: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl BufferConn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for a future `read_frame` call.
    pub fn inject(&self, frame: &[u8]) {
        self.inbound.lock().push_back(frame.to_vec());
        self.readable.notify_one();
    }

    /// Frames written so far, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Drain and return the written frames.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl PacketConn for BufferConn {
    fn read_frame(&self, buf: &mut [u8]) -> Result<usize> {
        let mut inbound = self.inbound.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::Closed);
            }
            if let Some(frame) = inbound.pop_front() {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                return Ok(n);
            }
            self.readable
                .wait_for(&mut inbound, Duration::from_millis(50));
        }
    }

    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        self.sent.lock().push(frame.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.readable.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
