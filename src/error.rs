//! Error types for zerowire
//!
//! This module defines the error types used throughout the application.
//! We use `thiserror` for ergonomic error definitions and `anyhow` for
//! error propagation in the binary entry point.

use std::time::Duration;

use thiserror::Error;

/// Main error type for zerowire operations
#[derive(Error, Debug)]
pub enum ZeroWireError {
    /// Configuration-related errors (malformed file, bad key material)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tunnel provisioning errors (link creation, addressing, keying)
    #[error("Tunnel setup error: {0}")]
    TunnelSetup(String),

    /// A `wg` invocation exited with a non-zero status
    #[error("wg command failed: {0}")]
    WgCommandFailed(String),

    /// `wg` produced output we could not parse
    #[error("wg output parse error: {0}")]
    WgParse(String),

    /// A peer advertisement failed validation and was dropped
    #[error("Peer rejected: {0}")]
    PeerRejected(String),

    /// A forwarded DNS query failed
    #[error("DNS forward error: {0}")]
    DnsForward(String),

    /// A DNS query did not answer within its deadline
    #[error("DNS query timed out after {0:?}")]
    DnsTimeout(Duration),

    /// A DNS handler failed; replied to the requester as SERVFAIL
    #[error("DNS handler error: {0}")]
    DnsHandler(String),

    /// A service handler process could not be run or exited non-zero
    #[error("Service handler failed: {0}")]
    HandlerFailed(String),

    /// Errors after startup that the supervisor cannot recover from
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// DNS wire-format errors
    #[error("DNS protocol error: {0}")]
    DnsProto(#[from] hickory_proto::error::ProtoError),

    /// mDNS daemon errors
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    /// System bus errors (systemd-resolved integration)
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ZeroWireError
pub type Result<T> = std::result::Result<T, ZeroWireError>;

impl From<serde_yaml::Error> for ZeroWireError {
    fn from(err: serde_yaml::Error) -> Self {
        ZeroWireError::Config(err.to_string())
    }
}

impl ZeroWireError {
    /// Process exit code for an error that escaped the supervisor.
    ///
    /// Everything surfacing before the run loop is an initialization
    /// failure (1); only `Runtime` maps to an unrecoverable runtime
    /// error (2).
    pub fn exit_code(&self) -> i32 {
        match self {
            ZeroWireError::Runtime(_) => 2,
            _ => 1,
        }
    }
}
