//! Tunnel service advertisement
//!
//! Builds the `_wireguard._udp` mDNS record a tunnel announces on one
//! physical link, and verifies the PSK-keyed MAC on advertisements
//! received from others. The digest input order is part of the wire
//! contract; both sides must feed the hash identically.

use std::collections::HashMap;
use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mdns_sd::ServiceInfo;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{Identity, IfaceConfig};
use crate::error::{Result, ZeroWireError};

/// The mDNS service type tunnels advertise under
pub const WG_SERVICE_TYPE: &str = "_wireguard._udp.local.";

/// Instance id for one (machine, physical link) pair: the first 16
/// bytes of `SHA-256(machine_id || link_name)`, hex-encoded.
pub fn instance_id(machine_id: &str, link_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(machine_id.as_bytes());
    hasher.update(link_name.as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// The advertisement MAC: `base64(SHA-256(dnshost || port || addr ||
/// hostname || pubkey || salt || psk))`, all fields in their textual
/// form.
pub fn auth_digest(
    dnshost: &str,
    port: u16,
    addr: &str,
    hostname: &str,
    pubkey: &str,
    salt: &str,
    psk: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dnshost.as_bytes());
    hasher.update(port.to_string().as_bytes());
    hasher.update(addr.as_bytes());
    hasher.update(hostname.as_bytes());
    hasher.update(pubkey.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.update(psk.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Build the advertisement for one tunnel on one physical link.
pub fn build(
    identity: &Identity,
    link_name: &str,
    addresses: &[IpAddr],
    cfg: &IfaceConfig,
) -> Result<ServiceInfo> {
    let port = cfg.port.ok_or_else(|| {
        ZeroWireError::TunnelSetup(format!("{}: listen port not yet known", cfg.name))
    })?;

    let instance = instance_id(&identity.machine_id, link_name);
    let dnshost = format!("{}.{}", instance, WG_SERVICE_TYPE);
    debug!("Advertising {} on {}", dnshost, link_name);

    let addr = cfg.ip().to_string();
    let salt = BASE64.encode(rand::random::<[u8; 32]>());
    let auth = auth_digest(
        &dnshost,
        port,
        &addr,
        &identity.hostname,
        &cfg.pubkey,
        &salt,
        cfg.psk.expose(),
    );

    let properties: HashMap<String, String> = [
        ("addr".to_string(), addr),
        ("hostname".to_string(), identity.hostname.clone()),
        ("pubkey".to_string(), cfg.pubkey.clone()),
        ("salt".to_string(), salt),
        ("auth".to_string(), auth),
    ]
    .into();

    let host = format!("{}.local.", identity.hostname);
    Ok(ServiceInfo::new(
        WG_SERVICE_TYPE,
        &instance,
        &host,
        addresses,
        port,
        properties,
    )?)
}

/// Verify a received advertisement against our PSK.
pub fn authenticate(info: &ServiceInfo, psk: &str) -> bool {
    let props = info.get_properties();
    let get = |key: &str| {
        props
            .get_property_val_str(key)
            .unwrap_or_default()
            .to_string()
    };

    let advertised = get("auth");
    if advertised.is_empty() {
        return false;
    }
    let expected = auth_digest(
        info.get_fullname(),
        info.get_port(),
        &get("addr"),
        &get("hostname"),
        &get("pubkey"),
        &get("salt"),
        psk,
    );
    expected == advertised
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    const CONFIG: &str = "
interfaces:
  test:
    addr: fd01:0203:0405:0607:0809:0a0b:0d0e:0f10/64
    psk: 1j75n1Zcwp9tUMuFH5H6C5Jn0PVjk66UXqSbY/OTjb8=
    privkey: aKwoU/4zwKzc89RLS1/ioOGHqqcSQPgTeMNfiPMrbGc=
    pubkey: h+LAI3+61Va12APH9GXLEy7NZdCLAPIb/ndrj9rsFBI=
    port: 19920
";

    fn iface() -> crate::config::IfaceConfig {
        Config::from_yaml(CONFIG)
            .unwrap()
            .interfaces
            .remove("wg-test")
            .unwrap()
    }

    #[test]
    fn test_instance_id_is_stable_hex() {
        let a = instance_id("machine", "eth0");
        let b = instance_id("machine", "eth0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_instance_id_varies_by_link() {
        assert_ne!(instance_id("machine", "eth0"), instance_id("machine", "eth1"));
    }

    #[test]
    fn test_advertisement_authenticates_with_shared_psk() {
        let cfg = iface();
        let identity = Identity::new("0123456789abcdef", "h1");
        let addresses = vec!["192.0.2.1".parse().unwrap()];

        let info = build(&identity, "eth0", &addresses, &cfg).unwrap();
        assert!(authenticate(&info, cfg.psk.expose()));
    }

    #[test]
    fn test_advertisement_rejected_with_wrong_psk() {
        let cfg = iface();
        let identity = Identity::new("0123456789abcdef", "h1");
        let addresses = vec!["192.0.2.1".parse().unwrap()];

        let info = build(&identity, "eth0", &addresses, &cfg).unwrap();
        assert!(!authenticate(
            &info,
            "1j75n1Zcwp9tUMuFH5H6C5Jn0PVjk66UXqSbY/OTjc8="
        ));
    }

    #[test]
    fn test_build_requires_port() {
        let mut cfg = iface();
        cfg.port = None;
        let identity = Identity::new("m", "h1");
        assert!(build(&identity, "eth0", &[], &cfg).is_err());
    }
}
