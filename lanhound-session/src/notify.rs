//! Online/offline notification channel
//!
//! Producers never block: the channel is a bounded ring and overflow drops
//! the oldest pending event, counting the loss. A single consumer reads
//! through [`NotificationReceiver`].

use lanhound_core::Addr;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Channel capacity; overflow beyond this drops the oldest event.
pub(crate) const CHANNEL_CAPACITY: usize = 128;

/// An online/offline transition of one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub addr: Addr,
    pub online: bool,
    pub dhcp4_name: String,
    pub mdns_name: String,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} online={} dhcp4name={} mdnsname={}",
            self.addr, self.online, self.dhcp4_name, self.mdns_name
        )
    }
}

struct Shared {
    queue: Mutex<VecDeque<Notification>>,
    readable: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
    capacity: usize,
}

/// Producer half, owned by the session.
pub(crate) struct Notifier {
    shared: Arc<Shared>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                readable: Notify::new(),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                capacity,
            }),
        }
    }

    /// Enqueue without blocking; on overflow the oldest event is dropped.
    pub fn send(&self, notification: Notification) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("notification channel overflow, dropped oldest");
            }
            queue.push_back(notification);
        }
        self.shared.readable.notify_one();
    }

    /// Number of events dropped to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Hand out the consumer half, optionally pre-seeded by the caller.
    pub fn receiver(&self) -> NotificationReceiver {
        NotificationReceiver {
            shared: self.shared.clone(),
        }
    }

    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.readable.notify_waiters();
        self.shared.readable.notify_one();
    }
}

/// Consumer half. The channel is single-consumer: hand one receiver to one
/// reader task.
pub struct NotificationReceiver {
    shared: Arc<Shared>,
}

impl NotificationReceiver {
    /// Wait for the next event; `None` once the session is closed and the
    /// queue has drained.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            if let Some(n) = self.shared.queue.lock().pop_front() {
                return Some(n);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            self.shared.readable.notified().await;
        }
    }

    /// Non-blocking read.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.shared.queue.lock().pop_front()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.lock().is_empty()
    }
}
