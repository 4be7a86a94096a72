//! systemd-resolved integration
//!
//! Tells the system resolver, over the system bus, to send `zerowire.`
//! lookups arriving on a tunnel link to our local resolver.

use std::net::IpAddr;

use tracing::debug;
use zbus::Connection;

use crate::dns::ZONE;
use crate::error::Result;

#[zbus::proxy(
    interface = "org.freedesktop.resolve1.Manager",
    default_service = "org.freedesktop.resolve1",
    default_path = "/org/freedesktop/resolve1"
)]
trait Manager {
    fn set_link_dns(&self, ifindex: i32, addresses: Vec<(i32, Vec<u8>)>) -> zbus::Result<()>;

    fn set_link_domains(&self, ifindex: i32, domains: Vec<(String, bool)>) -> zbus::Result<()>;
}

/// Point `zerowire.` routing for the given link at `resolver`.
pub async fn register_link(ifindex: u32, resolver: IpAddr) -> Result<()> {
    debug!("Registering link index {} with resolved", ifindex);

    let (family, octets) = match resolver {
        IpAddr::V4(addr) => (libc::AF_INET, addr.octets().to_vec()),
        IpAddr::V6(addr) => (libc::AF_INET6, addr.octets().to_vec()),
    };

    let connection = Connection::system().await?;
    let manager = ManagerProxy::new(&connection).await?;
    manager
        .set_link_dns(ifindex as i32, vec![(family, octets)])
        .await?;
    manager
        .set_link_domains(ifindex as i32, vec![(ZONE.to_string(), true)])
        .await?;
    Ok(())
}
