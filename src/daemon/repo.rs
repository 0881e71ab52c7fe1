//! Repository configuration of spawned nodes.

use std::path::Path;

use libp2p::Multiaddr;
use serde_json::{json, Value};

use super::{NodeKind, SpawnOptions};
use crate::error::{Error, Result};

/// Merges `patch` into `target`. Objects are merged key by key, anything else is replaced.
pub fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// The settings every spawned node gets: isolated from the public network, api on the reserved
/// loopback address and listening on the requested transports.
pub(crate) fn patch(kind: NodeKind, options: &SpawnOptions, api: &Multiaddr) -> Value {
    let mut swarm = options
        .transports
        .iter()
        .filter(|transport| transport.supported_by(kind))
        .map(|transport| transport.listen_addr().to_string())
        .collect::<Vec<_>>();
    let static_relays = options
        .static_relays
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    match kind {
        NodeKind::Go => {
            let mut patch = json!({
                "Addresses": {
                    "API": api.to_string(),
                    "Gateway": "/ip4/127.0.0.1/tcp/0",
                    "Swarm": swarm,
                    "Announce": [],
                    "NoAnnounce": [],
                },
                "Bootstrap": [],
                "Discovery": { "MDNS": { "Enabled": false } },
                "Swarm": {
                    "DisableNatPortMap": true,
                    "RelayClient": { "Enabled": options.relay_client },
                    "RelayService": { "Enabled": options.relay_service },
                    "Transports": { "Network": { "Websocket": true } },
                },
                "Pubsub": { "Enabled": options.pubsub, "Router": "gossipsub" },
                "Ipns": { "UsePubsub": options.ipns_pubsub },
            });
            // autorelay reserves only while reachability is private, loopback nodes never
            // learn that on their own
            if !static_relays.is_empty() {
                merge(
                    &mut patch,
                    json!({
                        "Swarm": { "RelayClient": { "StaticRelays": static_relays } },
                        "Internal": { "Libp2pForceReachability": "private" },
                    }),
                );
            }
            patch
        }
        NodeKind::Js => {
            // listening through a relay is what makes js-libp2p reserve a slot on it
            swarm.extend(static_relays.iter().map(|relay| format!("{relay}/p2p-circuit")));
            json!({
                "Addresses": {
                    "API": api.to_string(),
                    "Gateway": "/ip4/127.0.0.1/tcp/0",
                    "Swarm": swarm,
                    "Delegates": [],
                },
                "Bootstrap": [],
                "Discovery": {
                    "MDNS": { "Enabled": false },
                    "webRTCStar": { "Enabled": false },
                },
                "relay": {
                    "enabled": options.relay_client,
                    "hop": { "enabled": options.relay_service, "active": options.relay_service },
                    "reservationManager": {
                        "enabled": !static_relays.is_empty(),
                        "maxReservations": static_relays.len(),
                    },
                },
                "Pubsub": { "Enabled": options.pubsub, "Router": "gossipsub" },
            })
        }
    }
}

/// Applies `patch` and then the user supplied overrides to the `config` file of `repo`.
pub(crate) async fn apply(repo: &Path, patch: Value, overrides: Option<&Value>) -> Result<()> {
    let path = repo.join("config");
    let bytes = tokio::fs::read(&path).await?;
    let mut config: Value = serde_json::from_slice(&bytes)?;

    if !config.is_object() {
        return Err(Error::InvalidResponse(format!(
            "{} does not hold a json object",
            path.display()
        )));
    }

    merge(&mut config, patch);
    if let Some(overrides) = overrides {
        merge(&mut config, overrides.clone());
    }

    tokio::fs::write(&path, serde_json::to_vec_pretty(&config)?).await?;
    Ok(())
}

/// Whether `repo` already holds an initialized repository.
pub(crate) fn is_initialized(repo: &Path) -> bool {
    repo.join("config").is_file()
}
