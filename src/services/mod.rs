//! Cross-peer service discovery
//!
//! One task per installed peer walks the peer's DNS-SD tree over the
//! tunnel every minute, diffs the advertised instances against what is
//! already known, and runs the configured start handler for anything
//! new. Stop handlers run when the peer goes away; spawned children
//! are never left orphaned.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use hickory_proto::rr::{Name, RData, RecordType};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{normalize_service_type, PropValue, ServiceHandlerConfig};
use crate::dns::client::{self, QUERY_TIMEOUT};
use crate::dns::host_zone;
use crate::error::{Result, ZeroWireError};

/// Pause between discovery iterations
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// How long to wait for a handler child per attempt before killing it
pub const STOP_WAIT: Duration = Duration::from_secs(2);

/// How many wait attempts a child gets before the final kill
pub const STOP_ATTEMPTS: u32 = 3;

/// One decoded service instance advertised by a peer
#[derive(Debug, Clone)]
pub struct ServiceData {
    /// Normalized service type, e.g. `_rar._tcp.`
    pub service_type: String,
    /// Instance name
    pub name: String,
    /// SRV priority
    pub priority: u16,
    /// SRV weight
    pub weight: u16,
    /// SRV port
    pub port: u16,
    /// SRV target host
    pub target: String,
    /// Decoded TXT properties
    pub properties: HashMap<String, PropValue>,
}

/// Handle on a running per-peer discovery task
pub struct DiscoveryHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    known: Arc<Mutex<HashMap<String, ServiceData>>>,
    handlers: Arc<HashMap<String, ServiceHandlerConfig>>,
}

impl DiscoveryHandle {
    /// Instance names currently marked known
    pub async fn known_services(&self) -> Vec<String> {
        self.known.lock().await.keys().cloned().collect()
    }

    /// Cancel the crawl and run the stop handler for every known
    /// service.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;

        let known = self.known.lock().await;
        for data in known.values() {
            if let Some(handler) = self.handlers.get(&data.service_type) {
                run_stop_handler(handler, data).await;
            }
        }
    }
}

/// Start the discovery loop for one peer.
pub fn spawn_peer_discovery(
    handlers: Arc<HashMap<String, ServiceHandlerConfig>>,
    peer_host: String,
    peer_addr: IpAddr,
    dns_port: u16,
) -> DiscoveryHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let known = Arc::new(Mutex::new(HashMap::new()));
    let task = tokio::spawn(discovery_loop(
        handlers.clone(),
        peer_host,
        peer_addr,
        dns_port,
        known.clone(),
        stop_rx,
    ));
    DiscoveryHandle {
        stop: stop_tx,
        task,
        known,
        handlers,
    }
}

async fn discovery_loop(
    handlers: Arc<HashMap<String, ServiceHandlerConfig>>,
    peer_host: String,
    peer_addr: IpAddr,
    dns_port: u16,
    known: Arc<Mutex<HashMap<String, ServiceData>>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            return;
        }
        if let Err(e) = crawl_once(
            &handlers,
            &peer_host,
            peer_addr,
            dns_port,
            &known,
            &mut stop_rx,
        )
        .await
        {
            debug!("Discovery iteration for {} failed: {}", peer_host, e);
        }

        tokio::select! {
            _ = sleep(DISCOVERY_INTERVAL) => {}
            _ = stop_rx.changed() => return,
        }
    }
}

async fn crawl_once(
    handlers: &Arc<HashMap<String, ServiceHandlerConfig>>,
    peer_host: &str,
    peer_addr: IpAddr,
    dns_port: u16,
    known: &Arc<Mutex<HashMap<String, ServiceData>>>,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
    let peer_zone = host_zone(peer_host)?;
    let target = SocketAddr::new(peer_addr, dns_port);

    // 1. enumerate the peer's advertised service types
    let enum_name = Name::from_ascii("_services._dns-sd._udp")?.append_domain(&peer_zone)?;
    let reply = client::query(target, &enum_name, RecordType::PTR, QUERY_TIMEOUT).await?;

    let mut types = Vec::new();
    for ptr in ptr_targets(&reply) {
        let Some(relative) = strip_zone(&ptr, &peer_zone) else {
            continue;
        };
        let service_type = normalize_service_type(&relative.to_string());
        if handlers.contains_key(&service_type) {
            types.push((service_type, relative));
        } else {
            debug!("Ignoring unhandled service type {} on {}", service_type, peer_host);
        }
    }

    // 2. enumerate instances of each handled type, concurrently
    let mut type_queries = JoinSet::new();
    for (service_type, relative) in types {
        let full = relative.append_domain(&peer_zone)?;
        type_queries.spawn(async move {
            (
                service_type,
                client::query(target, &full, RecordType::PTR, QUERY_TIMEOUT).await,
            )
        });
    }

    let mut instances = Vec::new();
    while let Some(joined) = type_queries.join_next().await {
        let Ok((service_type, result)) = joined else {
            continue;
        };
        match result {
            Ok(reply) => {
                for ptr in ptr_targets(&reply) {
                    if let Some(relative) = strip_zone(&ptr, &peer_zone) {
                        let instance = String::from_utf8_lossy(
                            relative.iter().next().unwrap_or_default(),
                        )
                        .into_owned();
                        instances.push((service_type.clone(), instance, ptr));
                    }
                }
            }
            Err(e) => debug!("Instance query for {} failed: {}", service_type, e),
        }
    }

    // 3. resolve SRV and TXT for each instance, concurrently
    let mut instance_queries = JoinSet::new();
    for (service_type, instance, full_name) in instances {
        instance_queries.spawn(async move {
            let (srv, txt) = tokio::join!(
                client::query(target, &full_name, RecordType::SRV, QUERY_TIMEOUT),
                client::query(target, &full_name, RecordType::TXT, QUERY_TIMEOUT),
            );
            decode_service(service_type, instance, srv, txt)
        });
    }

    let mut discovered = Vec::new();
    while let Some(joined) = instance_queries.join_next().await {
        match joined {
            Ok(Some(data)) => discovered.push(data),
            Ok(None) => {}
            Err(e) => warn!("Instance resolution task failed: {}", e),
        }
    }

    // 4. run start handlers for anything new
    for data in discovered {
        if *stop_rx.borrow() {
            return Ok(());
        }
        if known.lock().await.contains_key(&data.name) {
            continue;
        }
        let Some(handler) = handlers.get(&data.service_type) else {
            continue;
        };
        match run_start_handler(handler, &data, stop_rx).await {
            Ok(true) => {
                info!(
                    "Service {} ({}) on {} started",
                    data.name, data.service_type, peer_host
                );
                known.lock().await.insert(data.name.clone(), data);
            }
            Ok(false) => warn!(
                "Start handler for {} ({}) exited non-zero; will retry",
                data.name, data.service_type
            ),
            Err(e) => warn!(
                "Start handler for {} ({}) failed: {}",
                data.name, data.service_type, e
            ),
        }
    }

    Ok(())
}

fn decode_service(
    service_type: String,
    instance: String,
    srv: Result<Message>,
    txt: Result<Message>,
) -> Option<ServiceData> {
    let srv = match srv {
        Ok(reply) => reply,
        Err(e) => {
            debug!("SRV query for {} failed: {}", instance, e);
            return None;
        }
    };
    let record = srv.answers().iter().find_map(|r| match r.data() {
        Some(RData::SRV(srv)) => Some(srv.clone()),
        _ => None,
    })?;

    let mut properties = HashMap::new();
    if let Ok(reply) = txt {
        for record in reply.answers() {
            if let Some(RData::TXT(txt)) = record.data() {
                properties.extend(crate::dns::txt::decode_properties(txt.txt_data()));
            }
        }
    }

    Some(ServiceData {
        service_type,
        name: instance,
        priority: record.priority(),
        weight: record.weight(),
        port: record.port(),
        target: record.target().to_string(),
        properties,
    })
}

/// Environment handed to every handler process
pub fn handler_env(data: &ServiceData) -> Vec<(String, String)> {
    let properties =
        serde_json::to_string(&data.properties).unwrap_or_else(|_| "{}".to_string());
    vec![
        (
            "ZW_SVC_TYPE".to_string(),
            data.service_type.trim_end_matches('.').to_string(),
        ),
        ("ZW_SVC_NAME".to_string(), data.name.clone()),
        ("ZW_SVC_PORT".to_string(), data.port.to_string()),
        ("ZW_SVC_TARGET".to_string(), data.target.clone()),
        ("ZW_SVC_PROPERTIES".to_string(), properties),
    ]
}

fn spawn_handler(command: &str, data: &ServiceData) -> Result<Child> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .envs(handler_env(data))
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| ZeroWireError::HandlerFailed(format!("cannot spawn {:?}: {}", command, e)))
}

/// Run the start command; `Ok(true)` when it exited zero. A stop
/// request during the wait terminates the child before returning.
async fn run_start_handler(
    handler: &ServiceHandlerConfig,
    data: &ServiceData,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<bool> {
    let mut child = spawn_handler(&handler.start, data)?;
    tokio::select! {
        status = child.wait() => {
            let status = status
                .map_err(|e| ZeroWireError::HandlerFailed(format!("wait failed: {}", e)))?;
            Ok(status.success())
        }
        _ = stop_rx.changed() => {
            terminate_child(&mut child).await;
            Err(ZeroWireError::HandlerFailed("cancelled".to_string()))
        }
    }
}

async fn run_stop_handler(handler: &ServiceHandlerConfig, data: &ServiceData) {
    let mut child = match spawn_handler(&handler.stop, data) {
        Ok(child) => child,
        Err(e) => {
            warn!("Stop handler for {} failed to spawn: {}", data.name, e);
            return;
        }
    };
    for _ in 0..STOP_ATTEMPTS {
        match timeout(STOP_WAIT, child.wait()).await {
            Ok(Ok(status)) => {
                if !status.success() {
                    warn!("Stop handler for {} exited {}", data.name, status);
                }
                return;
            }
            Ok(Err(e)) => {
                warn!("Stop handler wait for {} failed: {}", data.name, e);
                return;
            }
            Err(_) => {
                let _ = child.start_kill();
            }
        }
    }
    let _ = child.kill().await;
}

/// Terminate-then-kill: SIGTERM first, then bounded waits with kills.
async fn terminate_child(child: &mut Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    for _ in 0..STOP_ATTEMPTS {
        match timeout(STOP_WAIT, child.wait()).await {
            Ok(_) => return,
            Err(_) => {
                let _ = child.start_kill();
            }
        }
    }
    let _ = child.kill().await;
}

fn ptr_targets(reply: &Message) -> Vec<Name> {
    reply
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::PTR(ptr)) => Some(ptr.0.clone()),
            _ => None,
        })
        .collect()
}

/// Strip `<peer_zone>` (itself ending in `zerowire.`) from a name,
/// returning the relative remainder.
fn strip_zone(name: &Name, peer_zone: &Name) -> Option<Name> {
    if !peer_zone.zone_of(name) {
        debug!("Name {} is outside {}", name, peer_zone);
        return None;
    }
    let keep = usize::from(name.num_labels().checked_sub(peer_zone.num_labels())?);
    if keep == 0 {
        return None;
    }
    Name::from_labels(name.iter().take(keep)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> ServiceData {
        let mut properties = HashMap::new();
        properties.insert("yay".to_string(), PropValue::Str("yolo".to_string()));
        ServiceData {
            service_type: "_rar._tcp.".to_string(),
            name: "x".to_string(),
            priority: 0,
            weight: 0,
            port: 123,
            target: "h1.zerowire.".to_string(),
            properties,
        }
    }

    #[test]
    fn test_handler_env() {
        let env = handler_env(&data());
        let map: HashMap<_, _> = env.into_iter().collect();
        assert_eq!(map.get("ZW_SVC_TYPE").unwrap(), "_rar._tcp");
        assert_eq!(map.get("ZW_SVC_NAME").unwrap(), "x");
        assert_eq!(map.get("ZW_SVC_PORT").unwrap(), "123");
        assert_eq!(map.get("ZW_SVC_TARGET").unwrap(), "h1.zerowire.");
        assert_eq!(
            map.get("ZW_SVC_PROPERTIES").unwrap(),
            "{\"yay\":\"yolo\"}"
        );
    }

    #[test]
    fn test_handler_env_empty_properties() {
        let mut data = data();
        data.properties.clear();
        let env = handler_env(&data);
        let map: HashMap<_, _> = env.into_iter().collect();
        assert_eq!(map.get("ZW_SVC_PROPERTIES").unwrap(), "{}");
    }

    #[test]
    fn test_strip_zone() {
        let zone = Name::from_ascii("h1.zerowire.").unwrap();
        let full = Name::from_ascii("x._rar._tcp.h1.zerowire.").unwrap();
        let relative = strip_zone(&full, &zone).unwrap();
        assert_eq!(relative.to_string(), "x._rar._tcp");
    }

    #[test]
    fn test_strip_zone_outside() {
        let zone = Name::from_ascii("h1.zerowire.").unwrap();
        let other = Name::from_ascii("x._rar._tcp.h2.zerowire.").unwrap();
        assert!(strip_zone(&other, &zone).is_none());
    }

    #[test]
    fn test_strip_zone_itself() {
        let zone = Name::from_ascii("h1.zerowire.").unwrap();
        assert!(strip_zone(&zone, &zone).is_none());
    }
}
