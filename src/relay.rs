//! The standalone libp2p relay daemon.
//!
//! Circuit scenarios route traffic between two nodes through a relay which is neither of the
//! implementations under test. The relay runs from a generated identity and config file and
//! reports on stdout once its relay service is up.

use std::path::PathBuf;
use std::process::Stdio;

use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use serde_json::json;
use tempfile::TempDir;
use tokio::process::{Child, Command};

use crate::config::InteropConfig;
use crate::daemon::process;
use crate::error::{Error, Result};
use crate::p2p::{select_addr, MultiaddrExt, Transport};

const IDENTITY_LINE: &str = "I am ";
const V1_READY: &str = "RelayV1 is running!";
const V2_READY: &str = "RelayV2 is running!";

/// Which relay protocols to run and on which transports.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub transports: Vec<Transport>,
    pub v1: bool,
    pub v2: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            transports: vec![Transport::Tcp, Transport::WebSocket],
            v1: false,
            v2: true,
        }
    }
}

impl RelayOptions {
    pub fn transports(mut self, transports: impl IntoIterator<Item = Transport>) -> Self {
        self.transports = transports.into_iter().collect();
        self
    }

    pub fn v1(mut self, enabled: bool) -> Self {
        self.v1 = enabled;
        self
    }

    pub fn v2(mut self, enabled: bool) -> Self {
        self.v2 = enabled;
        self
    }

    fn ready_line(&self) -> &'static str {
        if self.v2 {
            V2_READY
        } else {
            V1_READY
        }
    }
}

/// A running relay daemon. Killed when dropped.
#[derive(Debug)]
pub struct RelayDaemon {
    id: PeerId,
    addrs: Vec<Multiaddr>,
    child: Option<Child>,
    // holds the config and identity files
    _dir: TempDir,
}

impl RelayDaemon {
    /// Starts the relay daemon found through `config`.
    pub async fn spawn(config: &InteropConfig, options: RelayOptions) -> Result<Self> {
        let binary = config
            .relay_daemon
            .clone()
            .ok_or_else(|| Error::RelayDaemonNotFound(PathBuf::from("libp2p-relay-daemon")))?;
        if !binary.is_file() {
            return Err(Error::RelayDaemonNotFound(binary));
        }

        let dir = tempfile::Builder::new()
            .prefix("ipfs-interop-relay-")
            .tempdir()?;

        let keypair = Keypair::generate_ed25519();
        let id = keypair.public().to_peer_id();
        let identity = dir.path().join("identity");
        tokio::fs::write(&identity, keypair.to_protobuf_encoding()?).await?;

        let mut listen = Vec::with_capacity(options.transports.len());
        for transport in &options.transports {
            let port = process::free_port(*transport)?;
            let base = Multiaddr::empty().with(Protocol::Ip4([127, 0, 0, 1].into()));
            listen.push(transport.listen_addr_on(base, port));
        }

        let config_file = dir.path().join("config.json");
        let relay_config = json!({
            "Network": {
                "ListenAddrs": listen.iter().map(ToString::to_string).collect::<Vec<_>>(),
            },
            "RelayV1": { "Enabled": options.v1 },
            "RelayV2": { "Enabled": options.v2 },
            "Daemon": { "PprofPort": -1 },
        });
        tokio::fs::write(&config_file, serde_json::to_vec_pretty(&relay_config)?).await?;

        debug!(%id, ?listen, "spawning relay daemon");

        let mut child = Command::new(&binary)
            .arg("-config")
            .arg(&config_file)
            .arg("-id")
            .arg(&identity)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let name = format!("relay {id}");
        let mut stderr = child
            .stderr
            .take()
            .map(|stderr| process::drain_stderr(name.clone(), stderr));

        let ready_line = options.ready_line();
        let ready = process::wait_ready(
            &name,
            &mut child,
            &mut stderr,
            config.startup_timeout,
            |line| line.contains(ready_line),
        )
        .await?;

        let reported = ready
            .output
            .iter()
            .find_map(|line| line.split_once(IDENTITY_LINE))
            .map(|(_, id)| id.trim().to_string());

        process::drain_stdout(name, ready.stdout);

        if let Some(reported) = reported {
            if reported != id.to_string() {
                child.kill().await?;
                return Err(Error::InvalidResponse(format!(
                    "relay daemon reports identity {reported}, expected {id}"
                )));
            }
        }

        let addrs = listen.into_iter().map(|addr| addr.with_peer(id)).collect();
        info!(%id, ?addrs, "relay daemon ready");

        Ok(Self {
            id,
            addrs,
            child: Some(child),
            _dir: dir,
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Listen addresses, each ending with the relay's peer id.
    pub fn addrs(&self) -> &[Multiaddr] {
        &self.addrs
    }

    pub fn addr_for(&self, transport: Transport) -> Result<Multiaddr> {
        select_addr(&self.addrs, transport)
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child.kill().await?;
            debug!(id = %self.id, "relay daemon stopped");
        }
        Ok(())
    }
}

impl Drop for RelayDaemon {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Whether a relay daemon binary is available to `config`.
pub fn is_available(config: &InteropConfig) -> bool {
    config
        .relay_daemon
        .as_ref()
        .is_some_and(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_line_follows_protocol_version() {
        assert_eq!(RelayOptions::default().ready_line(), V2_READY);
        assert_eq!(
            RelayOptions::default().v1(true).v2(false).ready_line(),
            V1_READY
        );
    }

    #[tokio::test]
    async fn missing_binary() {
        let config = InteropConfig::default().with_relay_daemon("/nonexistent/relayd");
        let err = RelayDaemon::spawn(&config, RelayOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RelayDaemonNotFound(path) if path.ends_with("relayd")));
    }
}
