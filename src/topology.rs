//! Wiring groups of nodes together.

use crate::daemon::ForeignNode;
use crate::error::Result;
use crate::p2p::Transport;

/// The way in which nodes are connected to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// no connections
    None,
    /// a > b > c
    Line,
    /// a > b > c > a
    Ring,
    /// a <> b <> c <> a
    Mesh,
    /// a > b, a > c
    Star,
}

impl Topology {
    /// Index pairs `(dialer, target)` for `n` nodes.
    pub fn edges(&self, n: usize) -> Vec<(usize, usize)> {
        match self {
            Topology::None => vec![],
            Topology::Line | Topology::Ring => {
                let mut edges = (1..n).map(|i| (i - 1, i)).collect::<Vec<_>>();
                if *self == Topology::Ring && n > 2 {
                    edges.push((n - 1, 0));
                }
                edges
            }
            Topology::Mesh => (0..n)
                .flat_map(|i| (0..n).filter(move |j| i != *j).map(move |j| (i, j)))
                .collect(),
            Topology::Star => (1..n).map(|i| (0, i)).collect(),
        }
    }
}

/// Connects `nodes` over tcp.
pub async fn connect(nodes: &[&ForeignNode], topology: Topology) -> Result<()> {
    connect_with(nodes, topology, Transport::Tcp).await
}

/// Connects `nodes` over `transport`, dialing one edge at a time.
pub async fn connect_with(
    nodes: &[&ForeignNode],
    topology: Topology,
    transport: Transport,
) -> Result<()> {
    for (from, to) in topology.edges(nodes.len()) {
        let addr = nodes[to].addr_for(transport)?;
        debug!(from = nodes[from].label(), to = nodes[to].label(), %addr, "connecting");
        nodes[from].swarm().connect(&addr).await?;
    }
    Ok(())
}
