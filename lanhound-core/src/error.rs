//! Error types for lanhound

use thiserror::Error;

/// Result type alias for lanhound operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lanhound
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O error
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or truncated frame; the packet is dropped
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Configuration constraint violated; fatal at construction
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Invalid or unspecified IP address
    #[error("invalid ip: {0}")]
    InvalidIp(String),

    /// Invalid MAC address
    #[error("invalid mac: {0}")]
    InvalidMac(String),

    /// No free IP left in the subnet pool
    #[error("address pool exhausted")]
    Exhausted,

    /// Lease MAC/IP mismatch during REQUEST processing
    #[error("lease conflict: {0}")]
    Conflict(String),

    /// Probe or wait deadline expired
    #[error("timeout")]
    Timeout,

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// The MAC is flagged as the gateway and cannot be captured
    #[error("host is a router")]
    IsRouter,

    /// Interface not found
    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),

    /// Interface error
    #[error("interface error: {0}")]
    Interface(String),

    /// Session or connection has been closed
    #[error("closed")]
    Closed,

    /// Unrecoverable condition; the process should terminate
    #[error("fatal: {0}")]
    Fatal(String),

    /// Protocol-level error
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Create an invalid frame error with a custom message
    pub fn invalid_frame<S: Into<String>>(msg: S) -> Self {
        Error::InvalidFrame(msg.into())
    }

    /// Create a protocol error with a custom message
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Error::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a lease conflict error
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Error::Conflict(msg.into())
    }
}
