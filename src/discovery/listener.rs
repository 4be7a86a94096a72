//! mDNS peer listener
//!
//! One [`LinkDiscovery`] runs per (tunnel, physical link) pair: it
//! registers the tunnel's advertisement on that link, browses for
//! other hosts' advertisements, and feeds every event through the
//! accept/reject pipeline. Accepted peers are installed as WireGuard
//! peers, named in the local resolver, and handed a service-discovery
//! task.
//!
//! The mDNS library delivers events on its own threads; they reach us
//! through the daemon's channel and are consumed on the runtime, so
//! shared state is only ever touched from tasks. The peer map itself
//! is still mutex-guarded so the pipeline is serialized per listener.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, RecordType};
use mdns_sd::{IfKind, Receiver, ServiceDaemon, ServiceEvent};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::discovery::advert::{self, WG_SERVICE_TYPE};
use crate::discovery::TunnelCtx;
use crate::dns::{host_zone, DNS_PORT};
use crate::error::{Result, ZeroWireError};
use crate::netdev;
use crate::services::{self, DiscoveryHandle};

/// An installed peer, keyed by public key in the listener map
pub struct PeerRecord {
    /// The peer's host name (no zone suffix)
    pub hostname: String,
    /// The peer's tunnel address
    pub addr: IpAddr,
    /// External endpoints installed for this peer
    pub endpoints: Vec<SocketAddr>,
    /// The mDNS fullname whose advertisement installed the peer
    pub fingerprint: String,
    discovery: DiscoveryHandle,
}

/// Consumes advertisement events for one tunnel on one physical link
pub struct PeerListener {
    ctx: Arc<TunnelCtx>,
    own_fullname: String,
    peers: Mutex<HashMap<String, PeerRecord>>,
}

impl PeerListener {
    /// Create a listener; `own_fullname` is our advertisement's mDNS
    /// fullname, used to skip our own broadcasts.
    pub fn new(ctx: Arc<TunnelCtx>, own_fullname: String) -> Arc<Self> {
        Arc::new(PeerListener {
            ctx,
            own_fullname,
            peers: Mutex::new(HashMap::new()),
        })
    }

    /// Dispatch one mDNS event
    pub async fn handle_event(self: &Arc<Self>, event: ServiceEvent) {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                if info.get_fullname() == self.own_fullname {
                    return;
                }
                let fullname = info.get_fullname().to_string();
                match self.add_peer(&info).await {
                    Ok(()) => {}
                    Err(ZeroWireError::PeerRejected(reason)) => {
                        info!("Rejected advertisement {}: {}", fullname, reason);
                    }
                    Err(e) => warn!("Failed to install peer {}: {}", fullname, e),
                }
            }
            ServiceEvent::ServiceRemoved(_, fullname) => {
                // Peers survive transient advertisement loss.
                info!("Service {} removed; keeping installed peer", fullname);
            }
            ServiceEvent::ServiceFound(_, fullname) => debug!("Found service {}", fullname),
            _ => {}
        }
    }

    async fn add_peer(self: &Arc<Self>, info: &mdns_sd::ServiceInfo) -> Result<()> {
        let cfg = &self.ctx.cfg;

        if !advert::authenticate(info, cfg.psk.expose()) {
            return Err(ZeroWireError::PeerRejected(
                "authentication failed".to_string(),
            ));
        }

        let props = info.get_properties();
        let addr_text = props.get_property_val_str("addr").unwrap_or_default();
        let pubkey = props
            .get_property_val_str("pubkey")
            .unwrap_or_default()
            .to_string();
        let hostname = props
            .get_property_val_str("hostname")
            .unwrap_or_default()
            .to_string();
        if addr_text.is_empty() || pubkey.is_empty() {
            return Err(ZeroWireError::PeerRejected(
                "missing addr or pubkey property".to_string(),
            ));
        }

        let internal: IpAddr = addr_text.parse().map_err(|_| {
            ZeroWireError::PeerRejected(format!("unparseable tunnel address {:?}", addr_text))
        })?;
        if internal == cfg.ip() {
            return Err(ZeroWireError::PeerRejected(
                "advertises our own tunnel address".to_string(),
            ));
        }
        if !cfg.prefix.contains(internal) {
            return Err(ZeroWireError::PeerRejected(format!(
                "address {} is outside tunnel prefix {}",
                internal, cfg.prefix
            )));
        }

        let mut peers = self.peers.lock().await;
        if peers.contains_key(&pubkey) {
            debug!("Peer {} already installed", pubkey);
            return Ok(());
        }

        let mut endpoints = Vec::new();
        for addr in info.get_addresses().iter() {
            if is_link_local(addr) {
                continue;
            }
            let endpoint = format_endpoint(addr, info.get_port());
            match self
                .ctx
                .wg
                .set_peer(
                    &cfg.name,
                    &pubkey,
                    cfg.psk.expose(),
                    &endpoint,
                    &[internal.to_string()],
                )
                .await
            {
                Ok(()) => endpoints.push(SocketAddr::new(*addr, info.get_port())),
                Err(e) => warn!("Failed to install endpoint {}: {}", endpoint, e),
            }
        }
        if endpoints.is_empty() {
            return Err(ZeroWireError::PeerRejected(
                "no usable endpoint address".to_string(),
            ));
        }

        let name = host_zone(&hostname)?;
        let rdata = match internal {
            IpAddr::V6(addr) => (RecordType::AAAA, RData::AAAA(AAAA(addr))),
            IpAddr::V4(addr) => (RecordType::A, RData::A(A(addr))),
        };
        self.ctx.store.write().await.add(&name, rdata.0, rdata.1);

        info!(
            "Installed peer {} ({}) at {:?}",
            hostname, pubkey, endpoints
        );

        let discovery = services::spawn_peer_discovery(
            self.ctx.handlers.clone(),
            hostname.clone(),
            internal,
            DNS_PORT,
        );
        peers.insert(
            pubkey,
            PeerRecord {
                hostname,
                addr: internal,
                endpoints,
                fingerprint: info.get_fullname().to_string(),
                discovery,
            },
        );
        Ok(())
    }

    /// Whether the given public key is installed on this listener
    pub async fn knows_peer(&self, pubkey: &str) -> bool {
        self.peers.lock().await.contains_key(pubkey)
    }

    /// Number of installed peers
    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Drop all peers, cancelling their discovery tasks and running
    /// stop handlers.
    pub async fn shutdown(&self) {
        let mut peers = self.peers.lock().await;
        for (pubkey, record) in peers.drain() {
            debug!("Stopping discovery for peer {}", pubkey);
            record.discovery.stop().await;
        }
    }
}

/// Advertisement plus browse session for one tunnel on one physical
/// link
pub struct LinkDiscovery {
    /// The physical link name
    pub link: String,
    daemon: ServiceDaemon,
    listener: Arc<PeerListener>,
    pump: JoinHandle<()>,
}

impl LinkDiscovery {
    /// Register our advertisement on `link` and start browsing for
    /// peers.
    pub fn start(ctx: Arc<TunnelCtx>, link: &str) -> Result<Self> {
        let addresses: Vec<IpAddr> = netdev::link_addresses(link)?;
        let info = advert::build(&ctx.identity, link, &addresses, &ctx.cfg)?;
        let own_fullname = info.get_fullname().to_string();

        let daemon = ServiceDaemon::new()?;
        daemon.disable_interface(IfKind::All)?;
        daemon.enable_interface(IfKind::Name(link.to_string()))?;
        daemon.register(info)?;
        let receiver = daemon.browse(WG_SERVICE_TYPE)?;

        let listener = PeerListener::new(ctx, own_fullname);
        let pump = tokio::spawn(pump_events(receiver, listener.clone()));

        info!("Peer discovery running on {}", link);
        Ok(LinkDiscovery {
            link: link.to_string(),
            daemon,
            listener,
            pump,
        })
    }

    /// The listener backing this link
    pub fn listener(&self) -> &Arc<PeerListener> {
        &self.listener
    }

    /// Close the mDNS socket, stop the event pump and drop all peers.
    pub async fn shutdown(self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!("mDNS shutdown on {} failed: {}", self.link, e);
        }
        self.pump.abort();
        self.listener.shutdown().await;
    }
}

async fn pump_events(receiver: Receiver<ServiceEvent>, listener: Arc<PeerListener>) {
    while let Ok(event) = receiver.recv_async().await {
        listener.handle_event(event).await;
    }
}

fn is_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(addr) => addr.is_link_local(),
        IpAddr::V6(addr) => (addr.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// `[IPv6]:port` or `IPv4:port`
pub fn format_endpoint(addr: &IpAddr, port: u16) -> String {
    match addr {
        IpAddr::V6(addr) => format!("[{}]:{}", addr, port),
        IpAddr::V4(addr) => format!("{}:{}", addr, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_endpoint() {
        assert_eq!(
            format_endpoint(&"192.0.2.1".parse().unwrap(), 51820),
            "192.0.2.1:51820"
        );
        assert_eq!(
            format_endpoint(&"fd01::1".parse().unwrap(), 51820),
            "[fd01::1]:51820"
        );
    }

    #[test]
    fn test_is_link_local() {
        assert!(is_link_local(&"fe80::1".parse().unwrap()));
        assert!(is_link_local(&"169.254.0.9".parse().unwrap()));
        assert!(!is_link_local(&"fd01::1".parse().unwrap()));
        assert!(!is_link_local(&"192.0.2.1".parse().unwrap()));
    }
}
