//! Bounded polling for state that converges asynchronously inside the daemons, such as peer
//! tables and topic meshes.

use std::future::Future;
use std::time::Duration;

use libp2p::PeerId;

use crate::api::IpfsClient;
use crate::error::{Error, Result};

/// Fixed attempt count and interval of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub attempts: usize,
    pub interval: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval: Duration::from_millis(500),
        }
    }
}

impl Retry {
    pub fn new(attempts: usize, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Runs `check` until it returns `true`, sleeping `retry.interval` between attempts.
///
/// `check` always runs at least once. Errors of `check` end the loop right away.
pub async fn poll_until<F, Fut>(retry: Retry, what: impl Into<String>, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let what = what.into();
    let attempts = retry.attempts.max(1);
    for attempt in 1..=attempts {
        if check().await? {
            trace!(%what, attempt, "converged");
            return Ok(());
        }
        if attempt < attempts {
            tokio::time::sleep(retry.interval).await;
        }
    }
    debug!(%what, attempts, "did not converge");
    Err(Error::Convergence { what, attempts })
}

/// Waits until `node` has an open connection to `peer`.
pub async fn wait_for_peer(node: &IpfsClient, peer: PeerId) -> Result<()> {
    poll_until(
        Retry::default(),
        format!("connection to {peer}"),
        || async move { node.swarm().is_connected(peer).await },
    )
    .await
}

/// Waits until `node` sees `peer` subscribed to `topic`.
pub async fn wait_for_topic_peer(node: &IpfsClient, topic: &str, peer: PeerId) -> Result<()> {
    poll_until(
        Retry::default(),
        format!("{peer} subscribed to {topic}"),
        || async move {
            let peers = node.pubsub().peers(topic).await?;
            Ok(peers.contains(&peer))
        },
    )
    .await
}

/// Waits until `node` lists `topic` among its own subscriptions.
pub async fn wait_for_subscription(node: &IpfsClient, topic: &str) -> Result<()> {
    poll_until(
        Retry::default(),
        format!("subscription to {topic}"),
        || async move {
            let topics = node.pubsub().ls().await?;
            Ok(topics.iter().any(|t| t == topic))
        },
    )
    .await
}
