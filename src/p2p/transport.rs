use std::fmt;
use std::str::FromStr;

use libp2p::{multiaddr::Protocol, Multiaddr};
use serde::{Deserialize, Serialize};

use crate::daemon::NodeKind;

/// Transports a scenario can wire nodes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    #[serde(rename = "ws")]
    WebSocket,
    Quic,
}

impl Transport {
    pub const ALL: [Transport; 3] = [Transport::Tcp, Transport::WebSocket, Transport::Quic];

    /// Loopback listen address on an ephemeral port.
    pub fn listen_addr(&self) -> Multiaddr {
        let base = Multiaddr::empty().with(Protocol::Ip4([127, 0, 0, 1].into()));
        self.listen_addr_on(base, 0)
    }

    /// Listen address for a fixed `port` on top of `base` (an ip or dns component).
    pub fn listen_addr_on(&self, base: Multiaddr, port: u16) -> Multiaddr {
        match self {
            Transport::Tcp => base.with(Protocol::Tcp(port)),
            Transport::WebSocket => base
                .with(Protocol::Tcp(port))
                .with(Protocol::Ws("/".into())),
            Transport::Quic => base.with(Protocol::Udp(port)).with(Protocol::QuicV1),
        }
    }

    /// Whether daemons of `kind` can listen on and dial this transport.
    pub fn supported_by(&self, kind: NodeKind) -> bool {
        !matches!((self, kind), (Transport::Quic, NodeKind::Js))
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transport::Tcp => "tcp",
            Transport::WebSocket => "ws",
            Transport::Quic => "quic",
        };
        f.write_str(name)
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "ws" | "websocket" => Ok(Transport::WebSocket),
            "quic" | "quic-v1" => Ok(Transport::Quic),
            other => Err(format!("unknown transport {other}")),
        }
    }
}
