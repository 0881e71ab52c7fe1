use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};
use reqwest::Url;

use super::Transport;
use crate::error::Error;

pub trait MultiaddrExt {
    /// Peer id
    fn peer_id(&self) -> Option<PeerId>;
    /// Relay peer id
    fn relay_peer_id(&self) -> Option<PeerId>;

    /// Address without the trailing peer protocols
    fn address(&self) -> Multiaddr;

    /// Determine if the address is a relay circuit
    fn is_relay(&self) -> bool;

    /// Determine if the address is being relayed to a peer
    fn is_relayed(&self) -> bool;

    fn is_loopback(&self) -> bool;

    /// Whether a node speaking only `transport` could dial this address.
    fn is_transport(&self, transport: Transport) -> bool;

    /// Appends `/p2p/<peer_id>` unless the address already ends with a peer id.
    fn with_peer(self, peer_id: PeerId) -> Multiaddr;
}

impl MultiaddrExt for Multiaddr {
    fn peer_id(&self) -> Option<PeerId> {
        match self.iter().last() {
            Some(Protocol::P2p(peer_id)) => Some(peer_id),
            _ => None,
        }
    }

    fn relay_peer_id(&self) -> Option<PeerId> {
        if !self.is_relay() {
            return None;
        }

        // the first peer id is the relay, anything after the circuit is the destination
        self.iter()
            .take_while(|proto| !matches!(proto, Protocol::P2pCircuit))
            .find_map(|proto| match proto {
                Protocol::P2p(peer_id) => Some(peer_id),
                _ => None,
            })
    }

    fn address(&self) -> Multiaddr {
        self.iter()
            .take_while(|proto| !matches!(proto, Protocol::P2p(_) | Protocol::P2pCircuit))
            .collect()
    }

    fn is_relay(&self) -> bool {
        self.iter()
            .any(|proto| matches!(proto, Protocol::P2pCircuit))
    }

    fn is_relayed(&self) -> bool {
        if !self.is_relay() {
            return false;
        }

        if self.peer_id().is_none() {
            return false;
        }

        true
    }

    fn is_loopback(&self) -> bool {
        self.iter().any(|proto| match proto {
            Protocol::Ip4(ip) => ip.is_loopback(),
            Protocol::Ip6(ip) => ip.is_loopback(),
            Protocol::Dns(host) | Protocol::Dns4(host) | Protocol::Dns6(host) => host == "localhost",
            _ => false,
        })
    }

    fn is_transport(&self, transport: Transport) -> bool {
        if self.is_relay() {
            return false;
        }

        let mut tcp = false;
        let mut ws = false;
        let mut quic = false;

        for proto in self.iter() {
            match proto {
                Protocol::Tcp(_) => tcp = true,
                Protocol::Ws(_) | Protocol::Wss(_) => ws = true,
                Protocol::QuicV1 => quic = true,
                Protocol::WebRTCDirect | Protocol::WebTransport | Protocol::Certhash(_) => {
                    return false
                }
                _ => {}
            }
        }

        match transport {
            Transport::Tcp => tcp && !ws,
            Transport::WebSocket => tcp && ws,
            Transport::Quic => quic,
        }
    }

    fn with_peer(self, peer_id: PeerId) -> Multiaddr {
        match self.iter().last() {
            Some(Protocol::P2p(_)) => self,
            _ => self.with(Protocol::P2p(peer_id)),
        }
    }
}

/// Addresses usable over `transport`, loopback ones first.
pub fn filter_by_transport<'a, I>(addrs: I, transport: Transport) -> Vec<Multiaddr>
where
    I: IntoIterator<Item = &'a Multiaddr>,
{
    let mut matching = addrs
        .into_iter()
        .filter(|addr| addr.is_transport(transport))
        .cloned()
        .collect::<Vec<_>>();

    // stable, so the daemon's own ordering is kept within each group
    matching.sort_by_key(|addr| !addr.is_loopback());
    matching
}

/// First address usable over `transport`.
pub fn select_addr(addrs: &[Multiaddr], transport: Transport) -> Result<Multiaddr, Error> {
    filter_by_transport(addrs, transport)
        .into_iter()
        .next()
        .ok_or_else(|| Error::NoTransportAddress {
            transport,
            addrs: addrs.to_vec(),
        })
}

/// Address dialing `target` through the relay reachable at `relay_addr`.
///
/// `relay_addr` must carry the relay's peer id.
pub fn circuit_addr(relay_addr: &Multiaddr, target: PeerId) -> Result<Multiaddr, Error> {
    if relay_addr.is_relay() {
        return Err(Error::InvalidResponse(format!(
            "{relay_addr} is already a circuit address"
        )));
    }

    if relay_addr.peer_id().is_none() {
        return Err(Error::InvalidResponse(format!(
            "relay address {relay_addr} is missing a peer id"
        )));
    }

    Ok(relay_addr
        .clone()
        .with(Protocol::P2pCircuit)
        .with(Protocol::P2p(target)))
}

/// Converts the multiaddr written to a repo's `api` file into an http base url.
pub fn api_url(addr: &Multiaddr) -> Result<Url, Error> {
    let mut host = None;
    let mut port = None;
    let mut scheme = "http";

    for proto in addr.iter() {
        match proto {
            Protocol::Ip4(ip) => host = Some(ip.to_string()),
            Protocol::Ip6(ip) => host = Some(format!("[{ip}]")),
            Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name) => {
                host = Some(name.to_string())
            }
            Protocol::Tcp(p) => port = Some(p),
            Protocol::Https | Protocol::Tls => scheme = "https",
            Protocol::Http => {}
            other => {
                return Err(Error::InvalidResponse(format!(
                    "unsupported protocol {other} in api address {addr}"
                )))
            }
        }
    }

    let (Some(host), Some(port)) = (host, port) else {
        return Err(Error::InvalidResponse(format!(
            "api address {addr} lacks a host or port"
        )));
    };

    Url::parse(&format!("{scheme}://{host}:{port}"))
        .map_err(|e| Error::InvalidResponse(format!("api address {addr}: {e}")))
}
