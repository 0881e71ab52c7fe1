//! Crate wide errors.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use libp2p::Multiaddr;

use crate::daemon::{NodeKind, NodeState};
use crate::p2p::Transport;

/// Errors surfaced by the harness. Any of these ends the scenario that hit it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The daemon answered the rpc call with an error body.
    #[error("rpc call {command} failed with status {status}: {message}")]
    Rpc {
        command: String,
        status: u16,
        code: i64,
        message: String,
    },

    #[error("malformed response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Multiaddr(#[from] libp2p::multiaddr::Error),

    #[error(transparent)]
    Cid(#[from] ipld_core::cid::Error),

    #[error(transparent)]
    Identity(#[from] libp2p::identity::DecodingError),

    #[error("invalid peer id: {0}")]
    PeerId(String),

    #[error("no binary configured for {0} nodes")]
    BinaryNotConfigured(NodeKind),

    #[error("relay daemon binary not found at {0}")]
    RelayDaemonNotFound(PathBuf),

    /// The process exited before reporting readiness. `output` holds everything it wrote.
    #[error("{name} exited before becoming ready ({status}): {output}")]
    ProcessExited {
        name: String,
        status: String,
        output: String,
    },

    #[error("{name} did not become ready within {timeout:?}")]
    StartupTimeout { name: String, timeout: Duration },

    #[error("cannot {operation} a node in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: NodeState,
    },

    #[error("no {transport} address available among {addrs:?}")]
    NoTransportAddress {
        transport: Transport,
        addrs: Vec<Multiaddr>,
    },

    #[error("{what} did not converge after {attempts} attempts")]
    Convergence { what: String, attempts: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
