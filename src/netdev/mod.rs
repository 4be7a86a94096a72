//! Local network device enumeration
//!
//! Lists physical links and their addresses and resolves interface
//! indices. Tunnel links themselves are provisioned in [`provision`].

pub mod provision;

pub use provision::Provisioner;

use std::collections::BTreeSet;
use std::ffi::CString;
use std::net::IpAddr;

use crate::config::IFACE_PREFIX;
use crate::error::{Result, ZeroWireError};

/// Names of physical links eligible for peer discovery: everything
/// except loopback and our own tunnel links.
pub fn physical_links() -> Result<Vec<String>> {
    let mut names = BTreeSet::new();
    for iface in if_addrs::get_if_addrs()? {
        if iface.is_loopback() || iface.name.starts_with(IFACE_PREFIX) {
            continue;
        }
        names.insert(iface.name);
    }
    Ok(names.into_iter().collect())
}

/// All addresses assigned to the named link.
pub fn link_addresses(name: &str) -> Result<Vec<IpAddr>> {
    Ok(if_addrs::get_if_addrs()?
        .into_iter()
        .filter(|iface| iface.name == name)
        .map(|iface| iface.ip())
        .collect())
}

/// Resolve a link name to its interface index.
pub fn ifindex(name: &str) -> Result<u32> {
    let cname = CString::new(name)
        .map_err(|_| ZeroWireError::TunnelSetup(format!("invalid link name {:?}", name)))?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(ZeroWireError::TunnelSetup(format!(
            "no such link: {}",
            name
        )));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ifindex_loopback() {
        // Every Linux machine has lo at some index.
        assert!(ifindex("lo").unwrap() > 0);
    }

    #[test]
    fn test_ifindex_missing_link() {
        assert!(ifindex("definitely-not-a-link").is_err());
    }

    #[test]
    fn test_physical_links_excludes_loopback() {
        let links = physical_links().unwrap();
        assert!(!links.iter().any(|name| name == "lo"));
        assert!(!links.iter().any(|name| name.starts_with(IFACE_PREFIX)));
    }
}
