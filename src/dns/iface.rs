//! Per-tunnel authoritative resolver
//!
//! One instance per tunnel, bound to the tunnel's own address. Serves
//! the host's DNS-SD zone rooted at `<hostname>.zerowire.` and answers
//! only requests originating inside the tunnel subnet; anything else
//! is dropped without a reply. Records are stored under suffix-relative
//! names and re-attached to the original qname when answering.

use std::net::SocketAddr;

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::rdata::{PTR, SRV, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use ipnetwork::IpNetwork;
use tracing::debug;

use crate::config::IfaceConfig;
use crate::dns::server::DnsHandler;
use crate::dns::store::RecordStore;
use crate::dns::txt::encode_properties;
use crate::dns::{host_zone, response_for, DEFAULT_TTL};
use crate::error::{Result, ZeroWireError};

const SERVICES_ENUM: &str = "_services._dns-sd._udp";
const BROWSE_DOMAIN: &str = "b._dns-sd._udp";
const LEGACY_BROWSE_DOMAIN: &str = "lb._dns-sd._udp";

/// Authoritative handler for this host's DNS-SD zone on one tunnel
pub struct InterfaceResolver {
    origin: Name,
    subnet: IpNetwork,
    records: RecordStore,
}

impl InterfaceResolver {
    /// Build the zone for one tunnel from its configuration
    pub fn new(hostname: &str, cfg: &IfaceConfig) -> Result<Self> {
        let origin = host_zone(hostname)?;
        let mut records = RecordStore::new();

        let services_enum = Name::from_ascii(SERVICES_ENUM)?;
        let enum_full = services_enum.clone().append_domain(&origin)?;
        records.add(
            &services_enum,
            RecordType::PTR,
            RData::PTR(PTR(enum_full)),
        );
        for browse in [BROWSE_DOMAIN, LEGACY_BROWSE_DOMAIN] {
            records.add(
                &Name::from_ascii(browse)?,
                RecordType::PTR,
                RData::PTR(PTR(origin.clone())),
            );
        }

        for svc in &cfg.services {
            let type_rel = Name::from_ascii(svc.service_type.trim_end_matches('.'))?;
            let instance_rel = Name::from_ascii(&svc.name)?.append_name(&type_rel)?;
            let type_full = type_rel.clone().append_domain(&origin)?;
            let instance_full = instance_rel.clone().append_domain(&origin)?;

            records.add(
                &type_rel,
                RecordType::PTR,
                RData::PTR(PTR(instance_full)),
            );
            records.add(
                &services_enum,
                RecordType::PTR,
                RData::PTR(PTR(type_full)),
            );
            records.add(
                &instance_rel,
                RecordType::SRV,
                RData::SRV(SRV::new(0, 0, svc.port, origin.clone())),
            );
            // DNS-SD represents "no properties" as a single empty
            // string rather than an empty TXT rdata.
            let mut entries = encode_properties(&svc.properties);
            if entries.is_empty() {
                entries.push(Vec::new());
            }
            records.add(
                &instance_rel,
                RecordType::TXT,
                RData::TXT(TXT::from_bytes(
                    entries.iter().map(|entry| entry.as_slice()).collect(),
                )),
            );
        }

        Ok(InterfaceResolver {
            origin,
            subnet: cfg.prefix,
            records,
        })
    }

    /// The zone origin, `<hostname>.zerowire.`
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    fn relative(&self, qname: &Name) -> Result<Name> {
        if !self.origin.zone_of(qname) {
            return Err(ZeroWireError::DnsHandler(format!(
                "{} is not within {}",
                qname, self.origin
            )));
        }
        let keep = usize::from(qname.num_labels() - self.origin.num_labels());
        if keep == 0 {
            return Ok(Name::root());
        }
        Ok(Name::from_labels(qname.iter().take(keep))?)
    }
}

#[async_trait]
impl DnsHandler for InterfaceResolver {
    async fn handle(&self, request: &Message, src: SocketAddr) -> Result<Option<Message>> {
        if !self.subnet.contains(src.ip()) {
            debug!("Dropping query from {} outside {}", src, self.subnet);
            return Ok(None);
        }

        let mut reply = response_for(request);
        reply.set_authoritative(true);

        let mut missing = false;
        for question in request.queries() {
            let qname = question.name().to_lowercase();
            let relative = self.relative(&qname)?;
            let records = self.records.get(&relative, question.query_type());
            if records.is_empty() {
                missing = true;
                continue;
            }
            for rdata in records {
                reply.add_answer(Record::from_rdata(
                    question.name().clone(),
                    DEFAULT_TTL,
                    rdata,
                ));
            }
        }

        if missing {
            reply.set_response_code(ResponseCode::NXDomain);
        }
        Ok(Some(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use hickory_proto::op::Query;

    const CONFIG: &str = "
interfaces:
  test:
    addr: fd01:0203:0405:0607:0809:0a0b:0d0e:0f10/64
    psk: 1j75n1Zcwp9tUMuFH5H6C5Jn0PVjk66UXqSbY/OTjb8=
    privkey: aKwoU/4zwKzc89RLS1/ioOGHqqcSQPgTeMNfiPMrbGc=
    pubkey: h+LAI3+61Va12APH9GXLEy7NZdCLAPIb/ndrj9rsFBI=
    port: 19920
    services:
    - type: rar
      name: x
      port: 123
      properties:
        yay: yolo
";

    fn resolver() -> InterfaceResolver {
        let config = Config::from_yaml(CONFIG).unwrap();
        let cfg = config.interfaces.get("wg-test").unwrap();
        InterfaceResolver::new("h1", cfg).unwrap()
    }

    fn request_for(qname: &str, rtype: RecordType) -> Message {
        let mut request = Message::new();
        request.set_id(9);
        request.add_query(Query::query(Name::from_ascii(qname).unwrap(), rtype));
        request
    }

    fn inside_src() -> SocketAddr {
        "[fd01:203:405:607::99]:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_service_enumeration() {
        let resolver = resolver();
        let request = request_for("_services._dns-sd._udp.h1.zerowire.", RecordType::PTR);

        let reply = resolver
            .handle(&request, inside_src())
            .await
            .unwrap()
            .unwrap();
        assert!(reply.authoritative());
        let targets: Vec<String> = reply
            .answers()
            .iter()
            .filter_map(|r| match r.data() {
                Some(RData::PTR(ptr)) => Some(ptr.0.to_string()),
                _ => None,
            })
            .collect();
        assert!(targets.contains(&"_rar._tcp.h1.zerowire.".to_string()));
        assert!(targets.contains(&"_services._dns-sd._udp.h1.zerowire.".to_string()));
    }

    #[tokio::test]
    async fn test_instance_enumeration() {
        let resolver = resolver();
        let request = request_for("_rar._tcp.h1.zerowire.", RecordType::PTR);

        let reply = resolver
            .handle(&request, inside_src())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.answers().len(), 1);
        match reply.answers()[0].data() {
            Some(RData::PTR(ptr)) => {
                assert_eq!(ptr.0.to_string(), "x._rar._tcp.h1.zerowire.")
            }
            other => panic!("expected PTR, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_srv_and_txt() {
        let resolver = resolver();
        let request = request_for("x._rar._tcp.h1.zerowire.", RecordType::SRV);
        let reply = resolver
            .handle(&request, inside_src())
            .await
            .unwrap()
            .unwrap();
        match reply.answers()[0].data() {
            Some(RData::SRV(srv)) => {
                assert_eq!(srv.port(), 123);
                assert_eq!(srv.target().to_string(), "h1.zerowire.");
            }
            other => panic!("expected SRV, got {:?}", other),
        }

        let request = request_for("x._rar._tcp.h1.zerowire.", RecordType::TXT);
        let reply = resolver
            .handle(&request, inside_src())
            .await
            .unwrap()
            .unwrap();
        match reply.answers()[0].data() {
            Some(RData::TXT(txt)) => {
                assert_eq!(&*txt.txt_data()[0], b"yay=yolo");
            }
            other => panic!("expected TXT, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_browse_domain_pointers() {
        let resolver = resolver();
        let request = request_for("b._dns-sd._udp.h1.zerowire.", RecordType::PTR);
        let reply = resolver
            .handle(&request, inside_src())
            .await
            .unwrap()
            .unwrap();
        match reply.answers()[0].data() {
            Some(RData::PTR(ptr)) => assert_eq!(ptr.0.to_string(), "h1.zerowire."),
            other => panic!("expected PTR, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_name_is_nxdomain() {
        let resolver = resolver();
        let request = request_for("_absent._tcp.h1.zerowire.", RecordType::PTR);
        let reply = resolver
            .handle(&request, inside_src())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.response_code(), ResponseCode::NXDomain);
    }

    #[tokio::test]
    async fn test_out_of_zone_is_handler_error() {
        let resolver = resolver();
        let request = request_for("x._rar._tcp.other.zerowire.", RecordType::SRV);
        assert!(resolver.handle(&request, inside_src()).await.is_err());
    }

    #[tokio::test]
    async fn test_outside_subnet_dropped() {
        let resolver = resolver();
        let request = request_for("_rar._tcp.h1.zerowire.", RecordType::PTR);
        let outside: SocketAddr = "[fd02::1]:40000".parse().unwrap();
        assert!(resolver
            .handle(&request, outside)
            .await
            .unwrap()
            .is_none());
    }
}
