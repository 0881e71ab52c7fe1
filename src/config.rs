//! Harness configuration.
//!
//! Everything is picked up from the environment so that the same test binary can be pointed at
//! different builds of the implementations under test. A kind without a binary (or an already
//! running rpc endpoint) is simply not enabled, and the scenarios requiring it are skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;

use crate::daemon::NodeKind;

pub const ENV_GO_EXEC: &str = "IPFS_GO_EXEC";
pub const ENV_JS_EXEC: &str = "IPFS_JS_EXEC";
pub const ENV_GO_EXEC_FALLBACK: &str = "GO_IPFS_PATH";
pub const ENV_JS_EXEC_FALLBACK: &str = "JS_IPFS_PATH";
pub const ENV_GO_RPC_URL: &str = "IPFS_GO_RPC_URL";
pub const ENV_JS_RPC_URL: &str = "IPFS_JS_RPC_URL";
pub const ENV_RELAY_DAEMON_PATH: &str = "LIBP2P_RELAY_DAEMON_PATH";
pub const ENV_STARTUP_TIMEOUT: &str = "IPFS_INTEROP_STARTUP_TIMEOUT_SECS";
pub const ENV_RELAY_SETTLE: &str = "IPFS_INTEROP_RELAY_SETTLE_MS";
pub const ENV_SHUTDOWN_GRACE: &str = "IPFS_INTEROP_SHUTDOWN_GRACE_SECS";

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RELAY_SETTLE: Duration = Duration::from_millis(2000);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Where the binaries and endpoints of the implementations under test are found.
#[derive(Debug, Clone)]
pub struct InteropConfig {
    /// Node binaries per implementation.
    pub binaries: HashMap<NodeKind, PathBuf>,

    /// Already running rpc endpoints per implementation. Takes priority over `binaries`.
    pub rpc_endpoints: HashMap<NodeKind, Url>,

    /// The standalone relay daemon, if available.
    pub relay_daemon: Option<PathBuf>,

    /// Upper bound on waiting for a daemon or relay to report readiness.
    pub startup_timeout: Duration,

    /// Time given to relay reservations to propagate before dialing through a relay.
    pub relay_settle: Duration,

    /// How long a daemon may take to exit after `shutdown` before it is killed.
    pub shutdown_grace: Duration,
}

impl Default for InteropConfig {
    fn default() -> Self {
        Self {
            binaries: HashMap::new(),
            rpc_endpoints: HashMap::new(),
            relay_daemon: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            relay_settle: DEFAULT_RELAY_SETTLE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl InteropConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut config = Self::default();

        for (kind, primary, fallback, rpc) in [
            (NodeKind::Go, ENV_GO_EXEC, ENV_GO_EXEC_FALLBACK, ENV_GO_RPC_URL),
            (NodeKind::Js, ENV_JS_EXEC, ENV_JS_EXEC_FALLBACK, ENV_JS_RPC_URL),
        ] {
            if let Some(path) = var(primary).or_else(|| var(fallback)) {
                config.binaries.insert(kind, PathBuf::from(path));
            }

            if let Some(url) = var(rpc) {
                match Url::parse(&url) {
                    Ok(url) => {
                        config.rpc_endpoints.insert(kind, url);
                    }
                    Err(e) => warn!("ignoring {rpc}={url}: {e}"),
                }
            }
        }

        config.relay_daemon = match var(ENV_RELAY_DAEMON_PATH) {
            Some(path) => Some(PathBuf::from(path)),
            None => Some(relay_daemon_dist::installed_binary(
                &relay_daemon_dist::default_install_dir(),
            ))
            .filter(|path| path.is_file()),
        };

        if let Some(secs) = var(ENV_STARTUP_TIMEOUT).and_then(|v| v.parse::<u64>().ok()) {
            config.startup_timeout = Duration::from_secs(secs);
        }

        if let Some(ms) = var(ENV_RELAY_SETTLE).and_then(|v| v.parse::<u64>().ok()) {
            config.relay_settle = Duration::from_millis(ms);
        }

        if let Some(secs) = var(ENV_SHUTDOWN_GRACE).and_then(|v| v.parse::<u64>().ok()) {
            config.shutdown_grace = Duration::from_secs(secs);
        }

        config
    }

    pub fn binary(&self, kind: NodeKind) -> Option<&Path> {
        self.binaries.get(&kind).map(PathBuf::as_path)
    }

    pub fn rpc_endpoint(&self, kind: NodeKind) -> Option<&Url> {
        self.rpc_endpoints.get(&kind)
    }

    /// A kind is enabled when it can either be spawned or attached to.
    pub fn is_enabled(&self, kind: NodeKind) -> bool {
        self.binaries.contains_key(&kind) || self.rpc_endpoints.contains_key(&kind)
    }

    pub fn enabled_kinds(&self) -> Vec<NodeKind> {
        NodeKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    pub fn with_binary(mut self, kind: NodeKind, path: impl Into<PathBuf>) -> Self {
        self.binaries.insert(kind, path.into());
        self
    }

    pub fn with_relay_daemon(mut self, path: impl Into<PathBuf>) -> Self {
        self.relay_daemon = Some(path.into());
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_relay_settle(mut self, settle: Duration) -> Self {
        self.relay_settle = settle;
        self
    }

    pub fn with_rpc_endpoint(mut self, kind: NodeKind, url: Url) -> Self {
        self.rpc_endpoints.insert(kind, url);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
