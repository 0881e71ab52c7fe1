//! Interoperability harness for IPFS implementations
//!
//! Spawns daemons of the [go-ipfs] (kubo) and [js-ipfs] implementations, wires them together over
//! tcp, websockets or circuit relays, and drives them through the http rpc api they share so that
//! scenarios can assert that content, pubsub messages, ipns records and pins cross implementation
//! boundaries.
//!
//! No protocol is implemented here: everything of interest happens inside the daemons, which
//! are treated as black boxes. The binaries are located through the environment, see
//! [`config::InteropConfig`].
//!
//! [go-ipfs]: https://github.com/ipfs/kubo/
//! [js-ipfs]: https://github.com/ipfs/js-ipfs/

#[macro_use]
extern crate tracing;

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod p2p;
pub mod relay;
pub mod topology;
pub mod wait;

pub use self::api::IpfsClient;
pub use self::config::InteropConfig;
pub use self::daemon::{Factory, ForeignNode, NodeKind, NodeState, SpawnOptions};
pub use self::error::{Error, Result};
pub use self::p2p::{MultiaddrExt, Transport};
pub use self::relay::{RelayDaemon, RelayOptions};
pub use self::topology::Topology;

pub use ipld_core::cid::Cid;
pub use libp2p::{Multiaddr, PeerId};
