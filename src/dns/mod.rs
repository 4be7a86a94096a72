//! DNS subsystem
//!
//! Carries both halves of the tunnel name service: the host-local
//! recursive resolver for the private `zerowire.` pseudo-TLD and the
//! per-tunnel authoritative responders that serve this host's DNS-SD
//! zone to peers. All messages use the `hickory-proto` wire types.

pub mod client;
pub mod iface;
pub mod local;
pub mod server;
pub mod store;
pub mod txt;

pub use iface::InterfaceResolver;
pub use local::LocalResolver;
pub use server::{DnsHandler, DnsUdpServer};
pub use store::RecordStore;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::Name;

use crate::error::Result;

/// The private pseudo-TLD under which peer names live
pub const ZONE: &str = "zerowire.";

/// Port peers serve and query DNS on, across the tunnel
pub const DNS_PORT: u16 = 53;

/// TTL applied to every record we serve
pub const DEFAULT_TTL: u32 = 60;

/// The `zerowire.` zone as a [`Name`]
pub fn zone() -> Name {
    Name::from_ascii(ZONE).expect("static zone name parses")
}

/// The per-host zone `<hostname>.zerowire.`
pub fn host_zone(hostname: &str) -> Result<Name> {
    Ok(Name::from_ascii(format!("{}.{}", hostname, ZONE))?.to_lowercase())
}

/// Start a response message mirroring the request's id, opcode and
/// questions.
pub fn response_for(request: &Message) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired());
    reply.add_queries(request.queries().iter().cloned());
    reply
}

/// A SERVFAIL reply for the given request
pub fn servfail_for(request: &Message) -> Message {
    let mut reply = response_for(request);
    reply.set_response_code(ResponseCode::ServFail);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::RecordType;

    #[test]
    fn test_zone_name() {
        let zone = zone();
        assert_eq!(zone.num_labels(), 1);
        assert!(zone.is_fqdn());
    }

    #[test]
    fn test_host_zone() {
        let hz = host_zone("MyHost").unwrap();
        assert_eq!(hz.to_string(), "myhost.zerowire.");
        assert!(zone().zone_of(&hz));
    }

    #[test]
    fn test_response_mirrors_request() {
        let mut request = Message::new();
        request.set_id(4242);
        request.add_query(Query::query(
            Name::from_ascii("h1.zerowire.").unwrap(),
            RecordType::AAAA,
        ));

        let reply = response_for(&request);
        assert_eq!(reply.id(), 4242);
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.queries().len(), 1);
    }
}
