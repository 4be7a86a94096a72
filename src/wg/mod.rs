//! WireGuard control adapter
//!
//! A thin shell over the external `wg` tool. High-level peer and
//! interface operations are translated into `wg` argument lists; key
//! material is never placed on the command line but written to the
//! process via `/dev/stdin`.

use std::process::{Output, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, ZeroWireError};

/// Persistent keepalive interval applied to every installed peer, in
/// seconds
pub const PERSISTENT_KEEPALIVE_SECS: u16 = 5;

/// Executes external commands. The production implementation shells
/// out; tests substitute a recorder.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, optionally writing `stdin` to the
    /// child, and collect its output.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<String>,
    ) -> std::io::Result<Output>;
}

/// Command runner backed by real processes
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<String>,
    ) -> std::io::Result<Output> {
        debug!("Executing command: {} {:?}", program, args);

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let Some(input) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(input.as_bytes()).await?;
            }
        }
        child.wait_with_output().await
    }
}

/// One parsed peer line from `wg show <iface> dump`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgDumpPeer {
    /// The peer's public key
    pub public_key: String,
    /// The peer's endpoint, `(none)` mapped to `None`
    pub endpoint: Option<String>,
    /// Comma-separated allowed-IPs as reported
    pub allowed_ips: String,
}

/// Parsed output of `wg show <iface> dump`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgDump {
    /// The effective listen port
    pub listen_port: u16,
    /// Installed peers
    pub peers: Vec<WgDumpPeer>,
}

/// The WireGuard control adapter. Stateless; concurrent invocations
/// are allowed.
#[derive(Clone)]
pub struct Wg {
    runner: Arc<dyn CommandRunner>,
}

impl Wg {
    /// Create an adapter over the given command runner
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Wg { runner }
    }

    async fn invoke(&self, args: Vec<String>, stdin: Option<String>) -> Result<String> {
        let output = self.runner.run("wg", &args, stdin).await.map_err(|e| {
            ZeroWireError::WgCommandFailed(format!("wg {}: {}", args.join(" "), e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ZeroWireError::WgCommandFailed(format!(
                "wg {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Set the interface private key and, when fixed, the listen port.
    /// The private key is delivered on stdin.
    pub async fn set_interface(
        &self,
        iface: &str,
        privkey: &str,
        listen_port: Option<u16>,
    ) -> Result<()> {
        let mut args = vec!["set".to_string(), iface.to_string()];
        if let Some(port) = listen_port {
            args.push("listen-port".to_string());
            args.push(port.to_string());
        }
        args.push("private-key".to_string());
        args.push("/dev/stdin".to_string());

        self.invoke(args, Some(privkey.to_string())).await?;
        Ok(())
    }

    /// Install or update a peer. The pre-shared key is delivered on
    /// stdin.
    pub async fn set_peer(
        &self,
        iface: &str,
        pubkey: &str,
        psk: &str,
        endpoint: &str,
        allowed_ips: &[String],
    ) -> Result<()> {
        let args = vec![
            "set".to_string(),
            iface.to_string(),
            "peer".to_string(),
            pubkey.to_string(),
            "preshared-key".to_string(),
            "/dev/stdin".to_string(),
            "endpoint".to_string(),
            endpoint.to_string(),
            "persistent-keepalive".to_string(),
            PERSISTENT_KEEPALIVE_SECS.to_string(),
            "allowed-ips".to_string(),
            allowed_ips.join(","),
        ];

        self.invoke(args, Some(psk.to_string())).await?;
        Ok(())
    }

    /// Dump interface state, returning the effective listen port and
    /// the installed peers.
    pub async fn dump(&self, iface: &str) -> Result<WgDump> {
        let stdout = self
            .invoke(
                vec!["show".to_string(), iface.to_string(), "dump".to_string()],
                None,
            )
            .await?;
        parse_dump(&stdout)
    }
}

/// Parse `wg show <iface> dump` output. The first line carries the
/// interface state (private key, public key, listen port, fwmark);
/// subsequent lines are peers.
fn parse_dump(stdout: &str) -> Result<WgDump> {
    let mut lines = stdout.lines();
    let first = lines
        .next()
        .ok_or_else(|| ZeroWireError::WgParse("empty dump output".to_string()))?;

    let fields: Vec<&str> = first.split('\t').collect();
    if fields.len() < 3 {
        return Err(ZeroWireError::WgParse(format!(
            "interface line has {} fields, expected at least 3",
            fields.len()
        )));
    }
    let listen_port = fields[2]
        .parse::<u16>()
        .map_err(|e| ZeroWireError::WgParse(format!("bad listen port {:?}: {}", fields[2], e)))?;

    let mut peers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            return Err(ZeroWireError::WgParse(format!(
                "peer line has {} fields, expected at least 4",
                fields.len()
            )));
        }
        peers.push(WgDumpPeer {
            public_key: fields[0].to_string(),
            endpoint: match fields[2] {
                "(none)" => None,
                ep => Some(ep.to_string()),
            },
            allowed_ips: fields[3].to_string(),
        });
    }

    Ok(WgDump { listen_port, peers })
}
