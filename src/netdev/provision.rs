//! Tunnel provisioning
//!
//! Materializes a WireGuard link from an [`IfaceConfig`]: any stale
//! link with the target name is removed, then the link is created,
//! addressed, brought up, keyed, and its effective listen port
//! recorded. Failures before the link is up are fatal for the tunnel;
//! later failures leave a best-effort partial state.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::IfaceConfig;
use crate::error::{Result, ZeroWireError};
use crate::wg::{CommandRunner, Wg};

/// Creates and configures WireGuard links via `ip(8)` and the WG
/// control adapter.
pub struct Provisioner {
    runner: Arc<dyn CommandRunner>,
    wg: Wg,
}

impl Provisioner {
    /// Create a provisioner sharing the given command runner
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let wg = Wg::new(runner.clone());
        Provisioner { runner, wg }
    }

    async fn ip(&self, args: &[&str]) -> Result<()> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let output = self
            .runner
            .run("ip", &args, None)
            .await
            .map_err(|e| ZeroWireError::TunnelSetup(format!("ip {}: {}", args.join(" "), e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ZeroWireError::TunnelSetup(format!(
                "ip {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn link_exists(&self, name: &str) -> bool {
        let args = vec![
            "link".to_string(),
            "show".to_string(),
            "dev".to_string(),
            name.to_string(),
        ];
        matches!(self.runner.run("ip", &args, None).await, Ok(output) if output.status.success())
    }

    /// Provision one tunnel, recording the kernel-chosen listen port
    /// back into the configuration when none was fixed.
    pub async fn provision(&self, cfg: &mut IfaceConfig) -> Result<()> {
        if self.link_exists(&cfg.name).await {
            info!("Removing existing link {}", cfg.name);
            self.ip(&["link", "del", "dev", &cfg.name]).await?;
        }

        self.ip(&["link", "add", &cfg.name, "type", "wireguard"])
            .await?;
        self.ip(&["addr", "add", &cfg.addr.to_string(), "dev", &cfg.name])
            .await?;
        self.ip(&["link", "set", &cfg.name, "up"]).await?;

        // The link is up; from here on failures degrade rather than
        // abort.
        if let Err(e) = self
            .wg
            .set_interface(&cfg.name, cfg.privkey.expose(), cfg.port)
            .await
        {
            warn!("Failed to key {}: {}", cfg.name, e);
            return Ok(());
        }

        if cfg.port.is_none() {
            match self.wg.dump(&cfg.name).await {
                Ok(dump) => {
                    info!(
                        "Link {} listening on kernel-chosen port {}",
                        cfg.name, dump.listen_port
                    );
                    cfg.port = Some(dump.listen_port);
                }
                Err(e) => {
                    warn!("Failed to read listen port of {}: {}", cfg.name, e);
                }
            }
        }

        Ok(())
    }
}
