use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use super::{arg, flag, IpfsClient, Query};
use crate::error::{Error, Result};

/// `key` commands, operating on the keystore of the daemon.
#[derive(Debug, Clone, Copy)]
pub struct Key<'a> {
    client: &'a IpfsClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    #[default]
    Ed25519,
    Rsa,
    Secp256k1,
}

impl KeyType {
    fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Rsa => "rsa",
            KeyType::Secp256k1 => "secp256k1",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ed25519" => Ok(KeyType::Ed25519),
            "rsa" => Ok(KeyType::Rsa),
            "secp256k1" => Ok(KeyType::Secp256k1),
            other => Err(Error::InvalidResponse(format!("unknown key type {other}"))),
        }
    }
}

/// A named key. `id` is the ipns name derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyInfo {
    pub name: String,
    pub id: String,
}

impl KeyInfo {
    /// The key's id as a peer id, whichever encoding the daemon printed it in.
    pub fn peer_id(&self) -> Result<libp2p::PeerId> {
        super::parse_peer_id(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyRenamed {
    pub was: String,
    pub now: String,
    pub id: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyList {
    #[serde(default)]
    keys: Option<Vec<KeyInfo>>,
}

impl<'a> Key<'a> {
    pub(crate) fn new(client: &'a IpfsClient) -> Self {
        Self { client }
    }

    pub async fn gen(&self, name: &str, key_type: KeyType) -> Result<KeyInfo> {
        let mut query = vec![arg(name), ("type", key_type.to_string())];
        if key_type == KeyType::Rsa {
            query.push(("size", "2048".into()));
        }
        self.client.call_json("key/gen", query).await
    }

    /// Every key of the keystore, including `self`.
    pub async fn list(&self) -> Result<Vec<KeyInfo>> {
        let KeyList { keys } = self.client.call_json("key/list", Query::new()).await?;
        Ok(keys.unwrap_or_default())
    }

    /// Removes the key and returns what was removed.
    pub async fn rm(&self, name: &str) -> Result<Vec<KeyInfo>> {
        let KeyList { keys } = self.client.call_json("key/rm", vec![arg(name)]).await?;
        Ok(keys.unwrap_or_default())
    }

    pub async fn rename(&self, old: &str, new: &str, force: bool) -> Result<KeyRenamed> {
        let query = vec![arg(old), arg(new), flag("force", force)];
        self.client.call_json("key/rename", query).await
    }
}
