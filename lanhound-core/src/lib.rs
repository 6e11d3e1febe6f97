//! Lanhound core library
//!
//! Fundamental types, error handling and the link-level transport trait
//! shared by every lanhound crate.

pub mod conn;
pub mod error;
pub mod nic;
pub mod types;

pub use conn::{BufferConn, PacketConn, RawConn};
pub use error::{Error, Result};
pub use nic::NicInfo;
pub use types::*;
