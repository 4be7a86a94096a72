//! Configuration management
//!
//! Parses and validates the YAML configuration file described in the
//! project README: a map of tunnel interfaces (address, key material,
//! optional listen port, optional advertised services) plus an optional
//! map of service handlers keyed by DNS-SD service type.

mod validation;

pub use validation::{normalize_service_type, validate_key32};

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, ZeroWireError};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/security/zerowire.conf";

/// Prefix applied to logical interface names to form kernel link names
pub const IFACE_PREFIX: &str = "wg-";

/// A secret configuration value (private key or pre-shared key).
///
/// Wiped on drop; `Debug` never prints the contained material.
#[derive(Clone, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Construct a secret from a string value
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// Access the secret material
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// A service property value: DNS-SD TXT entries carry either a string
/// or a boolean presence flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// Boolean flag (`key` when true, `key=` when false)
    Bool(bool),
    /// String value (`key=value`)
    Str(String),
}

/// A locally advertised DNS-SD service
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// DNS-SD service type (normalized to e.g. `_rar._tcp.`)
    #[serde(rename = "type")]
    pub service_type: String,

    /// Service instance name
    pub name: String,

    /// TCP/UDP port the service listens on
    pub port: u16,

    /// TXT properties advertised with the service
    #[serde(default)]
    pub properties: HashMap<String, PropValue>,
}

/// Start/stop commands run when a peer begins or stops advertising a
/// service of the configured type
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceHandlerConfig {
    /// Shell command run when a new service instance appears
    pub start: String,

    /// Shell command run when the owning peer is removed
    pub stop: String,
}

/// Configuration for a single WireGuard tunnel
#[derive(Debug, Clone)]
pub struct IfaceConfig {
    /// Kernel link name (`wg-` + logical name)
    pub name: String,

    /// Host tunnel address with prefix length
    pub addr: IpNetwork,

    /// The tunnel subnet (masked form of `addr`)
    pub prefix: IpNetwork,

    /// WireGuard private key (base64, 32 bytes raw)
    pub privkey: Secret,

    /// WireGuard public key (base64, 32 bytes raw)
    pub pubkey: String,

    /// Shared pre-shared key (base64, 32 bytes raw)
    pub psk: Secret,

    /// Listen port; filled in from the kernel after provisioning when
    /// the configuration leaves it unset
    pub port: Option<u16>,

    /// Locally advertised services
    pub services: Vec<ServiceConfig>,
}

impl IfaceConfig {
    /// The host's tunnel address
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Tunnel configurations keyed by kernel link name
    pub interfaces: HashMap<String, IfaceConfig>,

    /// Service handlers keyed by normalized service type
    pub service_handlers: HashMap<String, ServiceHandlerConfig>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    interfaces: HashMap<String, RawIfaceConfig>,
    #[serde(default)]
    service_handlers: HashMap<String, ServiceHandlerConfig>,
}

#[derive(Debug, Deserialize)]
struct RawIfaceConfig {
    addr: IpNetwork,
    privkey: Secret,
    pubkey: String,
    psk: Secret,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    services: Vec<ServiceConfig>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ZeroWireError::Config(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(text)?;

        let mut interfaces = HashMap::new();
        for (logical, iface) in raw.interfaces {
            let name = format!("{}{}", IFACE_PREFIX, logical);
            interfaces.insert(name.clone(), iface.into_config(name)?);
        }

        let service_handlers = raw
            .service_handlers
            .into_iter()
            .map(|(ty, handler)| (normalize_service_type(&ty), handler))
            .collect();

        Ok(Config {
            interfaces,
            service_handlers,
        })
    }
}

impl RawIfaceConfig {
    fn into_config(self, name: String) -> Result<IfaceConfig> {
        validate_key32(&name, "privkey", self.privkey.expose())?;
        validate_key32(&name, "pubkey", &self.pubkey)?;
        validate_key32(&name, "psk", self.psk.expose())?;

        let prefix = IpNetwork::new(self.addr.network(), self.addr.prefix())
            .map_err(|e| {
                ZeroWireError::Config(format!("{}: invalid prefix: {}", name, e))
            })?;

        let services = self
            .services
            .into_iter()
            .map(|mut svc| {
                svc.service_type = normalize_service_type(&svc.service_type);
                svc
            })
            .collect();

        Ok(IfaceConfig {
            name,
            addr: self.addr,
            prefix,
            privkey: self.privkey,
            pubkey: self.pubkey,
            psk: self.psk,
            port: self.port,
            services,
        })
    }
}

/// Host identity read once at startup
#[derive(Debug, Clone)]
pub struct Identity {
    /// Contents of `/etc/machine-id`, trimmed
    pub machine_id: String,

    /// The host name, as reported by the system
    pub hostname: String,
}

impl Identity {
    /// Read the machine id and host name from the system
    pub fn load() -> Result<Self> {
        let machine_id = std::fs::read_to_string("/etc/machine-id")
            .map_err(|e| {
                ZeroWireError::Config(format!("cannot read /etc/machine-id: {}", e))
            })?
            .trim()
            .to_string();
        Ok(Identity {
            machine_id,
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
        })
    }

    /// Construct an identity from known values (used by tests)
    pub fn new(machine_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Identity {
            machine_id: machine_id.into(),
            hostname: hostname.into(),
        }
    }
}
