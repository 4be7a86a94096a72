//! One-shot DNS queries over UDP
//!
//! Used for forwarding local-resolver questions to the owning peer and
//! for the service-discovery crawl. Every query gets its own ephemeral
//! socket and an individual deadline.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, Record, RecordType};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::{Result, ZeroWireError};

/// Deadline applied to each forwarded or crawled query
pub const QUERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Query `name`/`rtype` at `target` and return the full reply.
pub async fn query(
    target: SocketAddr,
    name: &Name,
    rtype: RecordType,
    deadline: Duration,
) -> Result<Message> {
    let mut request = Message::new();
    request
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    request.add_query(Query::query(name.clone(), rtype));
    exchange(target, request, deadline).await
}

/// Forward an existing question verbatim and return the upstream
/// answer records.
pub async fn forward(
    target: SocketAddr,
    question: &Query,
    deadline: Duration,
) -> Result<Vec<Record>> {
    let mut request = Message::new();
    request
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    request.add_query(question.clone());

    let mut reply = exchange(target, request, deadline).await?;
    Ok(reply.take_answers())
}

async fn exchange(target: SocketAddr, request: Message, deadline: Duration) -> Result<Message> {
    let bind: SocketAddr = if target.is_ipv4() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(target).await?;
    socket.send(&request.to_vec()?).await?;

    timeout(deadline, recv_reply(&socket, request.id()))
        .await
        .map_err(|_| ZeroWireError::DnsTimeout(deadline))?
}

async fn recv_reply(socket: &UdpSocket, id: u16) -> Result<Message> {
    let mut buf = vec![0u8; 4096];
    loop {
        let len = socket.recv(&mut buf).await?;
        match Message::from_vec(&buf[..len]) {
            Ok(reply) if reply.id() == id => return Ok(reply),
            Ok(_) => continue,
            Err(e) => {
                return Err(ZeroWireError::DnsForward(format!(
                    "unparseable reply: {}",
                    e
                )))
            }
        }
    }
}
