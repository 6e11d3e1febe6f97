//! Lanhound session core
//!
//! Maintains the authoritative view of every host on the LAN: a concurrent
//! MAC table where each entry owns its per-IP host records, online/offline
//! transition detection with a bounded notification channel, and the periodic
//! probe/purge scheduler.

pub mod hunt;
pub mod notify;
pub mod session;
pub mod table;

pub use hunt::{sleep_unless_stopped, Hunter};
pub use notify::{Notification, NotificationReceiver};
pub use session::{Session, SessionConfig};
pub use table::{Host, HostState, MacEntry, MacRow};
