//! Supervisor
//!
//! Assembles the whole daemon in dependency order: local resolver,
//! tunnel provisioning, per-tunnel resolvers and per-link peer
//! discovery, then system-resolver registration. Runs until SIGINT or
//! SIGTERM and tears everything down in reverse.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Config, Identity, IfaceConfig};
use crate::discovery::{LinkDiscovery, TunnelCtx};
use crate::dns::local::local_resolver_addr;
use crate::dns::{DnsUdpServer, InterfaceResolver, LocalResolver, RecordStore, DNS_PORT};
use crate::error::{Result, ZeroWireError};
use crate::netdev::{self, Provisioner};
use crate::wg::{CommandRunner, SystemRunner, Wg};

/// One running tunnel with its authoritative resolver and per-link
/// discovery sessions
struct Tunnel {
    cfg: Arc<IfaceConfig>,
    dns_task: JoinHandle<()>,
    discoveries: Vec<LinkDiscovery>,
}

/// Run the daemon until a termination signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let identity = Identity::load()?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    run_with(config, identity, runner).await
}

/// Run with explicit identity and command runner.
pub async fn run_with(
    mut config: Config,
    identity: Identity,
    runner: Arc<dyn CommandRunner>,
) -> Result<()> {
    let wg = Wg::new(runner.clone());
    let store = Arc::new(RwLock::new(RecordStore::new()));
    let local = Arc::new(LocalResolver::new(store.clone()));
    let local_server = DnsUdpServer::bind(local_resolver_addr(), local.clone()).await?;

    let provisioner = Provisioner::new(runner.clone());
    for cfg in config.interfaces.values_mut() {
        info!("Provisioning tunnel {}", cfg.name);
        provisioner.provision(cfg).await?;
        if cfg.port.is_none() {
            return Err(ZeroWireError::TunnelSetup(format!(
                "{}: listen port unknown after provisioning",
                cfg.name
            )));
        }
    }

    let handlers = Arc::new(config.service_handlers.clone());
    let links = netdev::physical_links()?;

    let mut tunnels = Vec::new();
    for (_, cfg) in config.interfaces.drain() {
        let cfg = Arc::new(cfg);

        let resolver = Arc::new(InterfaceResolver::new(&identity.hostname, &cfg)?);
        let server =
            DnsUdpServer::bind(SocketAddr::new(cfg.ip(), DNS_PORT), resolver).await?;
        let dns_task = server.spawn();

        let ctx = Arc::new(TunnelCtx {
            cfg: cfg.clone(),
            identity: identity.clone(),
            wg: wg.clone(),
            store: store.clone(),
            handlers: handlers.clone(),
        });
        let mut discoveries = Vec::new();
        for link in &links {
            match LinkDiscovery::start(ctx.clone(), link) {
                Ok(discovery) => discoveries.push(discovery),
                Err(e) => {
                    warn!("Peer discovery on {} for {} unavailable: {}", link, cfg.name, e)
                }
            }
        }

        tunnels.push(Tunnel {
            cfg,
            dns_task,
            discoveries,
        });
    }

    let local_task = local_server.spawn();

    for tunnel in &tunnels {
        match netdev::ifindex(&tunnel.cfg.name) {
            Ok(index) => {
                if let Err(e) = local.add_to_resolved(index).await {
                    warn!(
                        "Could not register {} with the system resolver: {}",
                        tunnel.cfg.name, e
                    );
                }
            }
            Err(e) => warn!("Cannot resolve index of {}: {}", tunnel.cfg.name, e),
        }
    }

    info!("zerowire running with {} tunnel(s)", tunnels.len());
    shutdown_signal().await;

    info!("Shutting down");
    for tunnel in tunnels {
        for discovery in tunnel.discoveries {
            discovery.shutdown().await;
        }
        tunnel.dns_task.abort();
    }
    local_task.abort();

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
