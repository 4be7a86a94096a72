//! DNS-over-UDP server
//!
//! Binds a socket and dispatches each datagram to a pluggable
//! handler. Handler failures become SERVFAIL replies; a handler may
//! return `None` to drop the query without answering.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dns::servfail_for;
use crate::error::Result;

/// Answers DNS requests. `Ok(None)` means drop the datagram without
/// replying.
#[async_trait]
pub trait DnsHandler: Send + Sync {
    /// Produce a reply for one request
    async fn handle(&self, request: &Message, src: SocketAddr) -> Result<Option<Message>>;
}

/// A UDP DNS server bound to one address
pub struct DnsUdpServer {
    socket: Arc<UdpSocket>,
    handler: Arc<dyn DnsHandler>,
}

impl DnsUdpServer {
    /// Bind the server socket. The serve loop starts with [`spawn`].
    ///
    /// [`spawn`]: DnsUdpServer::spawn
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn DnsHandler>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("DNS server bound to {}", socket.local_addr()?);
        Ok(DnsUdpServer {
            socket: Arc::new(socket),
            handler,
        })
    }

    /// The bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Start the serve loop
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut buf = vec![0u8; 4096];
        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("DNS socket receive failed: {}", e);
                    return;
                }
            };
            let datagram = buf[..len].to_vec();
            let socket = self.socket.clone();
            let handler = self.handler.clone();
            tokio::spawn(async move {
                handle_datagram(socket, handler, datagram, src).await;
            });
        }
    }
}

async fn handle_datagram(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn DnsHandler>,
    datagram: Vec<u8>,
    src: SocketAddr,
) {
    let request = match Message::from_vec(&datagram) {
        Ok(request) => request,
        Err(e) => {
            debug!("Unparseable DNS datagram from {}: {}", src, e);
            return;
        }
    };

    let reply = match handler.handle(&request, src).await {
        Ok(Some(reply)) => reply,
        Ok(None) => return,
        Err(e) => {
            error!("DNS handler failed for query from {}: {}", src, e);
            servfail_for(&request)
        }
    };

    match reply.to_vec() {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, src).await {
                debug!("Failed to send DNS reply to {}: {}", src, e);
            }
        }
        Err(e) => error!("Failed to encode DNS reply: {}", e),
    }
}
