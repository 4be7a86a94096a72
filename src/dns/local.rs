//! Host-local resolver for the `zerowire.` pseudo-TLD
//!
//! Bound to a fixed loopback address. Two-label names
//! (`<host>.zerowire.`) answer straight from the record store;
//! deeper names are DNS-SD lookups owned by the named peer, so the
//! original question is forwarded over the tunnel to that peer's own
//! resolver and the upstream answers are folded into the reply.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::dns::client::{self, QUERY_TIMEOUT};
use crate::dns::server::DnsHandler;
use crate::dns::store::RecordStore;
use crate::dns::{response_for, zone, DEFAULT_TTL, DNS_PORT};
use crate::error::Result;
use crate::resolved;

/// The fixed loopback address the local resolver binds to
pub const LOCAL_RESOLVER_IP: Ipv4Addr = Ipv4Addr::new(127, 122, 119, 53);

/// The local resolver's bind address
pub fn local_resolver_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(LOCAL_RESOLVER_IP), DNS_PORT)
}

/// Handler implementing the local `zerowire.` resolver semantics
pub struct LocalResolver {
    store: Arc<RwLock<RecordStore>>,
    forward_port: u16,
}

impl LocalResolver {
    /// Create a resolver answering from the shared record store
    pub fn new(store: Arc<RwLock<RecordStore>>) -> Self {
        LocalResolver {
            store,
            forward_port: DNS_PORT,
        }
    }

    /// Override the port sub-zone questions are forwarded to
    pub fn with_forward_port(mut self, port: u16) -> Self {
        self.forward_port = port;
        self
    }

    /// Route `zerowire.` lookups arriving on the given tunnel link to
    /// this resolver, via the system resolver manager.
    pub async fn add_to_resolved(&self, ifindex: u32) -> Result<()> {
        resolved::register_link(ifindex, IpAddr::V4(LOCAL_RESOLVER_IP)).await
    }

    /// Tunnel address of the peer owning `<owner>.zerowire.`, if known
    fn owner_address(store: &RecordStore, owner: &Name) -> Option<IpAddr> {
        for rtype in [RecordType::AAAA, RecordType::A] {
            for rdata in store.get(owner, rtype) {
                match rdata {
                    RData::AAAA(aaaa) => return Some(IpAddr::V6(aaaa.0)),
                    RData::A(a) => return Some(IpAddr::V4(a.0)),
                    _ => continue,
                }
            }
        }
        None
    }
}

#[async_trait]
impl DnsHandler for LocalResolver {
    async fn handle(&self, request: &Message, _src: SocketAddr) -> Result<Option<Message>> {
        let zone = zone();
        let mut reply = response_for(request);
        reply.set_recursion_available(true);

        let question_count = request.queries().len();
        let mut answered = vec![false; question_count];
        let mut forwards: Vec<(usize, IpAddr, hickory_proto::op::Query)> = Vec::new();

        {
            let store = self.store.read().await;
            for (index, question) in request.queries().iter().enumerate() {
                let qname = question.name().to_lowercase();
                if !zone.zone_of(&qname) {
                    debug!("Refusing query for {} outside {}", qname, zone);
                    reply.set_response_code(ResponseCode::Refused);
                    return Ok(Some(reply));
                }

                match qname.num_labels() {
                    2 => {
                        for rdata in store.get(&qname, question.query_type()) {
                            reply.add_answer(Record::from_rdata(
                                question.name().clone(),
                                DEFAULT_TTL,
                                rdata,
                            ));
                            answered[index] = true;
                        }
                    }
                    labels if labels > 2 => {
                        let owner = qname.trim_to(2);
                        match Self::owner_address(&store, &owner) {
                            Some(addr) => forwards.push((index, addr, question.clone())),
                            None => debug!("No owner known for {}", owner),
                        }
                    }
                    _ => {}
                }
            }
        }

        // Sub-zone questions go out concurrently, each with its own
        // deadline; a failed forward is omitted, not fatal.
        let mut tasks = JoinSet::new();
        for (index, addr, question) in forwards {
            let target = SocketAddr::new(addr, self.forward_port);
            tasks.spawn(async move {
                (
                    index,
                    client::forward(target, &question, QUERY_TIMEOUT).await,
                )
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(records))) => {
                    for record in records {
                        reply.add_answer(record);
                        answered[index] = true;
                    }
                }
                Ok((_, Err(e))) => debug!("Forwarded query failed: {}", e),
                Err(e) => warn!("Forward task panicked: {}", e),
            }
        }

        if answered.iter().any(|&got_answer| !got_answer) {
            reply.set_response_code(ResponseCode::NXDomain);
        }
        Ok(Some(reply))
    }
}
