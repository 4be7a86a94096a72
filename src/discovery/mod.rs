//! Peer discovery over link-local mDNS
//!
//! Each tunnel advertises itself as a `_wireguard._udp` service on
//! every physical LAN and browses for the same advertisements from
//! other hosts. Accepted peers are installed into the kernel via the
//! WG control adapter and registered in the local resolver's store.

pub mod advert;
pub mod listener;

pub use advert::{authenticate, WG_SERVICE_TYPE};
pub use listener::{LinkDiscovery, PeerListener};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{Identity, IfaceConfig, ServiceHandlerConfig};
use crate::dns::RecordStore;
use crate::wg::Wg;

/// Shared state one tunnel hands to its per-link listeners
pub struct TunnelCtx {
    /// The tunnel configuration
    pub cfg: Arc<IfaceConfig>,
    /// Host identity (machine id, hostname)
    pub identity: Identity,
    /// WG control adapter
    pub wg: Wg,
    /// The local resolver's record store
    pub store: Arc<RwLock<RecordStore>>,
    /// Configured service handlers, keyed by normalized type
    pub handlers: Arc<HashMap<String, ServiceHandlerConfig>>,
}
