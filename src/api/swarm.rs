use libp2p::{Multiaddr, PeerId};
use serde::Deserialize;

use super::{arg, parse_peer_id, IpfsClient, Query, Strings};
use crate::error::{Error, Result};

/// `swarm` commands.
#[derive(Debug, Clone, Copy)]
pub struct Swarm<'a> {
    client: &'a IpfsClient,
}

/// A connected peer as listed by `swarm/peers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmPeer {
    pub peer_id: PeerId,
    /// Remote address of the connection, without the peer id.
    pub addr: Multiaddr,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PeersResponse {
    #[serde(default)]
    peers: Option<Vec<PeerEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PeerEntry {
    addr: String,
    peer: String,
}

impl<'a> Swarm<'a> {
    pub(crate) fn new(client: &'a IpfsClient) -> Self {
        Self { client }
    }

    /// Dials `addr`. Completes once the connection is established.
    pub async fn connect(&self, addr: &Multiaddr) -> Result<()> {
        let Strings { strings } = self
            .client
            .call_json("swarm/connect", vec![arg(addr)])
            .await?;
        trace!(%addr, ?strings, "connected");
        Ok(())
    }

    pub async fn disconnect(&self, addr: &Multiaddr) -> Result<()> {
        let _: Strings = self
            .client
            .call_json("swarm/disconnect", vec![arg(addr)])
            .await?;
        Ok(())
    }

    pub async fn peers(&self) -> Result<Vec<SwarmPeer>> {
        let PeersResponse { peers } = self.client.call_json("swarm/peers", Query::new()).await?;

        peers
            .unwrap_or_default()
            .into_iter()
            .map(|PeerEntry { addr, peer }| -> Result<SwarmPeer> {
                Ok(SwarmPeer {
                    peer_id: parse_peer_id(&peer)?,
                    addr: addr.parse()?,
                })
            })
            .collect()
    }

    /// Whether a connection to `peer_id` is currently open.
    pub async fn is_connected(&self, peer_id: PeerId) -> Result<bool> {
        Ok(self
            .peers()
            .await?
            .iter()
            .any(|peer| peer.peer_id == peer_id))
    }

    /// Addresses the node listens on, suffixed with its peer id.
    pub async fn local_addrs(&self) -> Result<Vec<Multiaddr>> {
        let strings: Strings = self
            .client
            .call_json("swarm/addrs/local", vec![("id", "true".into())])
            .await?;

        strings
            .into_vec()
            .into_iter()
            .map(|addr| addr.parse::<Multiaddr>().map_err(Error::from))
            .collect()
    }
}
