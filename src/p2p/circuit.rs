//! Connecting two nodes through a circuit relay.
//!
//! Both nodes first dial the relay, then the dialer goes through
//! `<relay addr>/p2p-circuit/p2p/<target>`. The target has to be spawned with the relay in
//! [`SpawnOptions::static_relay`](crate::SpawnOptions::static_relay) to hold a reservation.
//! Reservations are not announced, so a fixed settle delay separates the two steps.

use std::time::Duration;

use libp2p::Multiaddr;

use super::{circuit_addr, Transport};
use crate::config::InteropConfig;
use crate::daemon::ForeignNode;
use crate::error::Result;
use crate::relay::RelayDaemon;
use crate::wait::wait_for_peer;

#[derive(Debug, Clone, Copy)]
pub struct CircuitOptions {
    /// Transport used to reach the relay.
    pub transport: Transport,
    /// Pause between reaching the relay and dialing through it.
    pub settle: Duration,
}

impl CircuitOptions {
    pub fn new(transport: Transport, settle: Duration) -> Self {
        Self { transport, settle }
    }

    /// Tcp with the settle delay of `config`.
    pub fn from_config(config: &InteropConfig) -> Self {
        Self::new(Transport::Tcp, config.relay_settle)
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }
}

/// Connects `a` to `b` through the standalone relay daemon. Returns the circuit address dialed.
pub async fn connect_via_relay(
    a: &ForeignNode,
    b: &ForeignNode,
    relay: &RelayDaemon,
    options: CircuitOptions,
) -> Result<Multiaddr> {
    let relay_addr = relay.addr_for(options.transport)?;
    connect_through(a, b, relay_addr, options.settle).await
}

/// Connects `a` to `b` through `relay`, a node running the relay service.
pub async fn connect_via_node_relay(
    a: &ForeignNode,
    b: &ForeignNode,
    relay: &ForeignNode,
    options: CircuitOptions,
) -> Result<Multiaddr> {
    let relay_addr = relay.addr_for(options.transport)?;
    connect_through(a, b, relay_addr, options.settle).await
}

async fn connect_through(
    a: &ForeignNode,
    b: &ForeignNode,
    relay_addr: Multiaddr,
    settle: Duration,
) -> Result<Multiaddr> {
    let target = b.peer_id()?;
    let circuit = circuit_addr(&relay_addr, target)?;

    a.swarm().connect(&relay_addr).await?;
    b.swarm().connect(&relay_addr).await?;
    debug!(a = a.label(), b = b.label(), %relay_addr, "both connected to relay");

    tokio::time::sleep(settle).await;

    a.swarm().connect(&circuit).await?;
    wait_for_peer(a, target).await?;

    info!(a = a.label(), b = b.label(), %circuit, "connected through relay");
    Ok(circuit)
}
