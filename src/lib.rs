//! zerowire: zero-configuration WireGuard mesh
//!
//! Builds a mesh VPN overlay on top of the kernel WireGuard transport.
//! Tunnels are materialized from static configuration, advertised over
//! link-local mDNS on every physical LAN, and peers found there are
//! authenticated against a shared pre-shared key before being
//! installed. A local resolver names every peer under the private
//! `zerowire.` pseudo-TLD and forwards DNS-SD lookups across the
//! tunnel to the peer that owns them.
//!
//! # Modules
//!
//! - `config`: YAML configuration parsing and validation
//! - `wg`: control adapter over the external `wg` tool
//! - `netdev`: link enumeration and tunnel provisioning
//! - `dns`: record store, UDP server, local and per-tunnel resolvers
//! - `resolved`: systemd-resolved integration over the system bus
//! - `discovery`: mDNS advertisement and peer listener
//! - `services`: cross-peer DNS-SD crawl and service handlers
//! - `supervisor`: assembly, signals, run loop
//! - `error`: error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod dns;
pub mod error;
pub mod netdev;
pub mod resolved;
pub mod services;
pub mod supervisor;
pub mod wg;

// Re-export commonly used types
pub use error::{Result, ZeroWireError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
