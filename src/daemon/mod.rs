//! Spawning and controlling the daemons under test.
//!
//! A [`ForeignNode`] owns one external daemon process and its repository. Nodes are created
//! through a [`Factory`], which knows where the binaries of every implementation live:
//!
//! ```no_run
//! # async fn example() -> ipfs_interop::Result<()> {
//! use ipfs_interop::{Factory, NodeKind, SpawnOptions};
//!
//! let factory = Factory::from_env();
//! let go = factory.spawn(SpawnOptions::new(NodeKind::Go)).await?;
//! let js = factory.spawn(SpawnOptions::new(NodeKind::Js)).await?;
//!
//! go.swarm().connect(&js.addrs()[0]).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use serde_json::Value;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::api::IpfsClient;
use crate::config::InteropConfig;
use crate::error::{Error, Result};
use crate::p2p::{api_url, select_addr, MultiaddrExt, Transport};

pub(crate) mod process;
mod repo;

pub use self::repo::merge as merge_config;

const READY_LINE: &str = "Daemon is ready";
const API_LINES: [&str; 2] = ["RPC API server listening on", "API listening on"];

/// The implementations under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    /// Kubo, formerly go-ipfs.
    Go,
    /// js-ipfs.
    Js,
}

impl NodeKind {
    pub const ALL: [NodeKind; 2] = [NodeKind::Go, NodeKind::Js];

    fn daemon_args(&self, options: &SpawnOptions) -> Vec<&'static str> {
        let mut args = vec!["daemon"];
        match self {
            NodeKind::Go => {
                if options.pubsub {
                    args.push("--enable-pubsub-experiment");
                }
                if options.ipns_pubsub {
                    args.push("--enable-namesys-pubsub");
                }
            }
            NodeKind::Js => {
                if options.ipns_pubsub {
                    args.push("--enable-namesys-pubsub");
                }
            }
        }
        if options.offline {
            args.push("--offline");
        }
        args
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Go => f.write_str("go"),
            NodeKind::Js => f.write_str("js"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "go" | "kubo" => Ok(NodeKind::Go),
            "js" => Ok(NodeKind::Js),
            other => Err(format!("unknown node kind {other}")),
        }
    }
}

/// Lifecycle of a [`ForeignNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Initialized,
    Running,
    Stopped,
    Removed,
}

/// How a node is spawned. Defaults give an initialized and running node on a temporary repo,
/// listening on tcp and websockets.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub kind: NodeKind,
    /// Used in logs and temporary directory names; generated when unset.
    pub name: Option<String>,
    pub init: bool,
    pub start: bool,
    /// Removes the repository when the node is dropped.
    pub disposable: bool,
    /// Repository location for non disposable nodes.
    pub repo_path: Option<PathBuf>,
    pub transports: Vec<Transport>,
    pub relay_client: bool,
    /// Relays the node reserves a slot on as soon as it starts, each ending with `/p2p/<id>`.
    pub static_relays: Vec<Multiaddr>,
    pub relay_service: bool,
    pub pubsub: bool,
    pub ipns_pubsub: bool,
    pub offline: bool,
    /// Merged into the repository config after the defaults of the harness.
    pub config: Option<Value>,
    pub env: Vec<(String, String)>,
    /// Extra arguments for the `daemon` command.
    pub args: Vec<String>,
}

impl SpawnOptions {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            name: None,
            init: true,
            start: true,
            disposable: true,
            repo_path: None,
            transports: vec![Transport::Tcp, Transport::WebSocket],
            relay_client: true,
            static_relays: Vec::new(),
            relay_service: false,
            pubsub: true,
            ipns_pubsub: false,
            offline: false,
            config: None,
            env: Vec::new(),
            args: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn init(mut self, init: bool) -> Self {
        self.init = init;
        self
    }

    pub fn start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    /// Uses the repository at `path` and keeps it when the node is dropped.
    pub fn repo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.repo_path = Some(path.into());
        self.disposable = false;
        self
    }

    pub fn disposable(mut self, disposable: bool) -> Self {
        self.disposable = disposable;
        self
    }

    pub fn transports(mut self, transports: impl IntoIterator<Item = Transport>) -> Self {
        self.transports = transports.into_iter().collect();
        self
    }

    pub fn relay_client(mut self, enabled: bool) -> Self {
        self.relay_client = enabled;
        self
    }

    /// Makes the node reachable through `relay`. Implies the relay client.
    pub fn static_relay(mut self, relay: Multiaddr) -> Self {
        self.relay_client = true;
        self.static_relays.push(relay);
        self
    }

    pub fn relay_service(mut self, enabled: bool) -> Self {
        self.relay_service = enabled;
        self
    }

    pub fn pubsub(mut self, enabled: bool) -> Self {
        self.pubsub = enabled;
        self
    }

    pub fn ipns_pubsub(mut self, enabled: bool) -> Self {
        self.ipns_pubsub = enabled;
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Config overrides; merged with earlier overrides.
    pub fn config(mut self, patch: Value) -> Self {
        match &mut self.config {
            Some(config) => merge_config(config, patch),
            None => self.config = Some(patch),
        }
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Creates nodes of the configured implementations.
#[derive(Debug, Clone)]
pub struct Factory {
    config: Arc<InteropConfig>,
    counter: Arc<AtomicUsize>,
}

impl Factory {
    pub fn new(config: InteropConfig) -> Self {
        Self {
            config: Arc::new(config),
            counter: Arc::default(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(InteropConfig::from_env())
    }

    pub fn config(&self) -> &InteropConfig {
        &self.config
    }

    /// Creates a node, running through `init` and `start` as requested by `options`.
    ///
    /// When an rpc endpoint is configured for the kind, the returned node is attached to that
    /// daemon instead and no process is spawned.
    pub async fn spawn(&self, options: SpawnOptions) -> Result<ForeignNode> {
        let kind = options.kind;
        let name = options.name.clone().unwrap_or_else(|| {
            format!("{kind}-{}", self.counter.fetch_add(1, Ordering::Relaxed))
        });

        if let Some(url) = self.config.rpc_endpoint(kind) {
            return ForeignNode::attach(name, kind, IpfsClient::new(url.clone())).await;
        }

        let binary = self
            .config
            .binary(kind)
            .ok_or(Error::BinaryNotConfigured(kind))?
            .to_path_buf();

        let repo = match (&options.repo_path, options.disposable) {
            (Some(path), false) => RepoDir::Kept(path.clone()),
            (Some(path), true) => RepoDir::Owned(path.clone()),
            (None, disposable) => {
                let dir = tempfile::Builder::new()
                    .prefix(&format!("ipfs-interop-{name}-"))
                    .tempdir()?;
                if disposable {
                    RepoDir::Temp(dir)
                } else {
                    RepoDir::Kept(dir.keep())
                }
            }
        };

        let api_port = process::free_port(Transport::Tcp)?;
        let api_addr = Multiaddr::empty()
            .with(Protocol::Ip4([127, 0, 0, 1].into()))
            .with(Protocol::Tcp(api_port));

        debug!(%name, %kind, repo = %repo.path().display(), %api_addr, "spawning");

        let mut node = ForeignNode {
            client: IpfsClient::new(api_url(&api_addr)?),
            name,
            kind,
            state: NodeState::Created,
            peer_id: None,
            addrs: Vec::new(),
            api_addr,
            binary: Some(binary),
            repo: Some(repo),
            startup_timeout: self.config.startup_timeout,
            shutdown_grace: self.config.shutdown_grace,
            child: None,
            stderr: None,
            options,
        };

        if node.options.init {
            node.init().await?;
        }
        if node.options.start {
            node.start().await?;
        }

        Ok(node)
    }
}

#[derive(Debug)]
enum RepoDir {
    /// Removed on drop.
    Temp(TempDir),
    /// User supplied, removed on drop.
    Owned(PathBuf),
    /// Never removed implicitly.
    Kept(PathBuf),
}

impl RepoDir {
    fn path(&self) -> &Path {
        match self {
            RepoDir::Temp(dir) => dir.path(),
            RepoDir::Owned(path) | RepoDir::Kept(path) => path,
        }
    }

    fn remove(self) -> Result<()> {
        match self {
            RepoDir::Temp(dir) => dir.close()?,
            RepoDir::Owned(path) | RepoDir::Kept(path) => {
                if path.exists() {
                    std::fs::remove_dir_all(path)?;
                }
            }
        }
        Ok(())
    }
}

/// A daemon of one of the implementations under test, controlled over its rpc api.
///
/// Dereferences to the [`IpfsClient`] of the daemon. Dropping the node kills the daemon and
/// removes a disposable repository.
#[derive(Debug)]
pub struct ForeignNode {
    name: String,
    kind: NodeKind,
    state: NodeState,
    peer_id: Option<PeerId>,
    addrs: Vec<Multiaddr>,
    client: IpfsClient,
    api_addr: Multiaddr,
    /// `None` for nodes attached to an already running daemon.
    binary: Option<PathBuf>,
    repo: Option<RepoDir>,
    options: SpawnOptions,
    startup_timeout: Duration,
    shutdown_grace: Duration,
    child: Option<Child>,
    stderr: Option<JoinHandle<Vec<String>>>,
}

impl ForeignNode {
    async fn attach(name: String, kind: NodeKind, client: IpfsClient) -> Result<Self> {
        debug!(%name, %kind, url = %client.base_url(), "attaching");
        let mut node = ForeignNode {
            api_addr: Multiaddr::empty(),
            client,
            name,
            kind,
            state: NodeState::Running,
            peer_id: None,
            addrs: Vec::new(),
            binary: None,
            repo: None,
            options: SpawnOptions::new(kind),
            startup_timeout: Duration::ZERO,
            shutdown_grace: Duration::ZERO,
            child: None,
            stderr: None,
        };
        node.refresh().await?;
        Ok(node)
    }

    /// Name used in logs, not to be confused with [`IpfsClient::name`].
    pub fn label(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Whether this handle controls an externally managed daemon.
    pub fn is_attached(&self) -> bool {
        self.binary.is_none()
    }

    pub fn repo_path(&self) -> Option<&Path> {
        self.repo.as_ref().map(RepoDir::path)
    }

    pub fn client(&self) -> &IpfsClient {
        &self.client
    }

    /// The peer id, known once the repository is initialized.
    pub fn peer_id(&self) -> Result<PeerId> {
        self.peer_id.ok_or(Error::InvalidState {
            operation: "read the peer id of",
            state: self.state,
        })
    }

    /// Dialable addresses of the running node, each ending with its peer id.
    pub fn addrs(&self) -> &[Multiaddr] {
        &self.addrs
    }

    /// First address usable over `transport`, loopback preferred.
    pub fn addr_for(&self, transport: Transport) -> Result<Multiaddr> {
        select_addr(&self.addrs, transport)
    }

    fn check(&self, operation: &'static str, allowed: &[NodeState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn repo(&self) -> Result<&Path> {
        self.repo_path().ok_or(Error::InvalidState {
            operation: "access the repository of",
            state: self.state,
        })
    }

    fn command(&self, binary: &Path, repo: &Path) -> Command {
        let mut command = Command::new(binary);
        command
            .env("IPFS_PATH", repo)
            .envs(self.options.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Initializes the repository and applies the harness defaults to its config.
    ///
    /// An already initialized repository only gets its config updated.
    pub async fn init(&mut self) -> Result<()> {
        let Some(binary) = self.binary.clone() else {
            return Ok(());
        };
        self.check("init", &[NodeState::Created])?;
        let repo = self.repo()?.to_path_buf();

        if repo::is_initialized(&repo) {
            debug!(name = %self.name, "repository already initialized");
        } else {
            let mut command = self.command(&binary, &repo);
            command.args(["init", "--profile=test"]);

            let output = match tokio::time::timeout(self.startup_timeout, command.output()).await {
                Ok(output) => output?,
                Err(_) => {
                    return Err(Error::StartupTimeout {
                        name: format!("{} init", self.name),
                        timeout: self.startup_timeout,
                    })
                }
            };

            if !output.status.success() {
                return Err(Error::ProcessExited {
                    name: format!("{} init", self.name),
                    status: output.status.to_string(),
                    output: format!(
                        "{}{}",
                        String::from_utf8_lossy(&output.stdout),
                        String::from_utf8_lossy(&output.stderr)
                    ),
                });
            }
        }

        let patch = repo::patch(self.kind, &self.options, &self.api_addr);
        repo::apply(&repo, patch, self.options.config.as_ref()).await?;
        self.peer_id = read_peer_id(&repo).await;

        self.state = NodeState::Initialized;
        info!(name = %self.name, peer_id = ?self.peer_id, "initialized");
        Ok(())
    }

    /// Starts the daemon and waits until it reports readiness.
    pub async fn start(&mut self) -> Result<()> {
        let Some(binary) = self.binary.clone() else {
            return Ok(());
        };
        self.check("start", &[NodeState::Initialized, NodeState::Stopped])?;
        let repo = self.repo()?.to_path_buf();

        let mut command = self.command(&binary, &repo);
        command
            .args(self.kind.daemon_args(&self.options))
            .args(&self.options.args);

        let mut child = command.spawn()?;
        let mut stderr = child
            .stderr
            .take()
            .map(|stderr| process::drain_stderr(self.name.clone(), stderr));

        let mut announced = None;
        let ready = process::wait_ready(
            &self.name,
            &mut child,
            &mut stderr,
            self.startup_timeout,
            |line| {
                if let Some(addr) = API_LINES
                    .iter()
                    .find_map(|marker| process::addr_after(line, marker))
                {
                    announced = addr.parse::<Multiaddr>().ok();
                }
                line.contains(READY_LINE)
            },
        )
        .await?;

        process::drain_stdout(self.name.clone(), ready.stdout);
        self.child = Some(child);
        self.stderr = stderr;

        let api_addr = match read_api_file(&repo).await {
            Some(addr) => addr,
            None => announced.unwrap_or_else(|| self.api_addr.clone()),
        };
        self.client = IpfsClient::new(api_url(&api_addr)?);
        self.api_addr = api_addr;
        self.state = NodeState::Running;

        self.refresh().await?;
        info!(name = %self.name, url = %self.client.base_url(), addrs = ?self.addrs, "started");
        Ok(())
    }

    /// Re-reads the identity and addresses of the running node.
    pub async fn refresh(&mut self) -> Result<()> {
        let info = self.client.id().await?;
        self.addrs = info
            .addresses
            .into_iter()
            .filter(|addr| !addr.is_relay())
            .map(|addr| addr.with_peer(info.id))
            .collect();
        self.peer_id = Some(info.id);
        Ok(())
    }

    /// Asks the daemon to shut down, killing it when it does not exit in time.
    pub async fn stop(&mut self) -> Result<()> {
        self.check("stop", &[NodeState::Running])?;

        if let Err(e) = self.client.shutdown().await {
            debug!(name = %self.name, "shutdown request failed: {e}");
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                Ok(status) => debug!(name = %self.name, status = ?status.ok(), "exited"),
                Err(_) => {
                    warn!(name = %self.name, "did not exit after shutdown, killing");
                    child.kill().await?;
                }
            }
        }
        self.stderr = None;

        self.state = NodeState::Stopped;
        info!(name = %self.name, "stopped");
        Ok(())
    }

    /// Removes the repository. The node cannot be started afterwards.
    pub async fn cleanup(&mut self) -> Result<()> {
        match self.state {
            NodeState::Removed => return Ok(()),
            NodeState::Running => {
                return Err(Error::InvalidState {
                    operation: "clean up",
                    state: self.state,
                })
            }
            _ => {}
        }

        if let Some(repo) = self.repo.take() {
            tokio::task::spawn_blocking(move || repo.remove())
                .await
                .map_err(std::io::Error::other)??;
        }

        self.state = NodeState::Removed;
        debug!(name = %self.name, "removed");
        Ok(())
    }
}

impl Deref for ForeignNode {
    type Target = IpfsClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl Drop for ForeignNode {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                trace!(name = %self.name, "kill on drop: {e}");
            }
        }

        if let Some(RepoDir::Owned(path)) = self.repo.take() {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                trace!(name = %self.name, "removing {}: {e}", path.display());
            }
        }
    }
}

async fn read_api_file(repo: &Path) -> Option<Multiaddr> {
    let contents = tokio::fs::read_to_string(repo.join("api")).await.ok()?;
    contents.trim().parse().ok()
}

async fn read_peer_id(repo: &Path) -> Option<PeerId> {
    let bytes = tokio::fs::read(repo.join("config")).await.ok()?;
    let config: Value = serde_json::from_slice(&bytes).ok()?;
    config["Identity"]["PeerID"].as_str()?.parse().ok()
}
