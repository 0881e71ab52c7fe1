//! Addressing and transports of the nodes under test.

mod addr;
pub mod circuit;
mod transport;

pub use self::addr::{api_url, circuit_addr, filter_by_transport, select_addr, MultiaddrExt};
pub use self::circuit::{connect_via_node_relay, connect_via_relay, CircuitOptions};
pub use self::transport::Transport;
