//! Client for the http rpc api exposed by the daemons under test.
//!
//! The Go and JS implementations serve the same command surface: every command is a `POST` to
//! `/api/v0/<command>` with its arguments in the query string, and replies with either a json
//! document, a stream of newline delimited json documents or raw bytes. Failed commands reply with
//! a non-success status and a `{"Message": .., "Code": .., "Type": "error"}` body.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use ipld_core::cid::Cid;
use libp2p::{Multiaddr, PeerId};
use reqwest::{multipart, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};

mod files;
mod key;
mod name;
mod pin;
mod pubsub;
mod swarm;
mod unixfs;

pub use self::files::{FileStat, FileType, Files, FilesEntry, FilesWriteOptions};
pub use self::key::{Key, KeyInfo, KeyRenamed, KeyType};
pub use self::name::{
    pubsub_topic as ipns_pubsub_topic, Name, NamePublishOptions, NamePublished,
    NameResolveOptions,
};
pub use self::pin::{Pin, PinListOptions, PinMode};
pub use self::pubsub::{Pubsub, PubsubMessage, SubscriptionStream};
pub use self::swarm::{Swarm, SwarmPeer};
pub use self::unixfs::{AddEntry, AddOptions, AddedFile, CatOptions};

pub(crate) type Query = Vec<(&'static str, String)>;

/// Rpc client of a single daemon.
#[derive(Debug, Clone)]
pub struct IpfsClient {
    http: reqwest::Client,
    base: Url,
}

/// Identity of a node as reported by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// The peer id of the node.
    pub id: PeerId,

    /// The public key of the node, as the daemon encodes it.
    pub public_key: String,

    /// The addresses the node is listening on or has observed for itself.
    pub addresses: Vec<Multiaddr>,

    /// Name and version of the implementation, e.g. `kubo/0.29.0/`.
    pub agent_version: String,

    /// The list of protocols supported by the node, e.g. `/ipfs/bitswap/1.2.0`.
    pub protocols: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionInfo {
    pub version: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub system: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    addresses: Option<Vec<String>>,
    #[serde(default)]
    agent_version: Option<String>,
    #[serde(default)]
    protocols: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RpcErrorBody {
    message: String,
    #[serde(default)]
    code: i64,
}

/// `{"Strings": [...]}`, used by several commands; `null` means empty.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Strings {
    #[serde(default)]
    pub strings: Option<Vec<String>>,
}

impl Strings {
    pub fn into_vec(self) -> Vec<String> {
        self.strings.unwrap_or_default()
    }
}

impl IpfsClient {
    pub fn new(base: Url) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self::with_client(http, base)
    }

    pub fn with_client(http: reqwest::Client, base: Url) -> Self {
        Self { http, base }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, command: &str) -> Result<Url> {
        self.base
            .join(&format!("api/v0/{command}"))
            .map_err(|e| Error::InvalidResponse(format!("bad rpc url for {command}: {e}")))
    }

    pub(crate) fn request(&self, command: &str, query: &Query) -> Result<RequestBuilder> {
        Ok(self.http.post(self.endpoint(command)?).query(query))
    }

    /// Sends the request, turning error statuses into [`Error::Rpc`].
    pub(crate) async fn send(&self, command: &str, request: RequestBuilder) -> Result<Response> {
        trace!(command, "rpc request");
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let (message, code) = match serde_json::from_str::<RpcErrorBody>(&body) {
            Ok(RpcErrorBody { message, code }) => (message, code),
            Err(_) => (body.trim().to_string(), 0),
        };

        debug!(command, status = status.as_u16(), %message, "rpc error");

        Err(Error::Rpc {
            command: command.to_string(),
            status: status.as_u16(),
            code,
            message,
        })
    }

    pub(crate) async fn call(&self, command: &str, query: Query) -> Result<Response> {
        let request = self.request(command, &query)?;
        self.send(command, request).await
    }

    pub(crate) async fn call_json<T: DeserializeOwned>(
        &self,
        command: &str,
        query: Query,
    ) -> Result<T> {
        let response = self.call(command, query).await?;
        let bytes = response.bytes().await?;
        decode_json(command, &bytes)
    }

    pub(crate) async fn call_bytes(&self, command: &str, query: Query) -> Result<Bytes> {
        let response = self.call(command, query).await?;
        Ok(response.bytes().await?)
    }

    /// Sends `data` as the single multipart file of the request.
    pub(crate) async fn call_with_data(
        &self,
        command: &str,
        query: Query,
        data: Vec<u8>,
    ) -> Result<Response> {
        let part = multipart::Part::bytes(data).file_name("data");
        let form = multipart::Form::new().part("file", part);
        let request = self.request(command, &query)?.multipart(form);
        self.send(command, request).await
    }

    /// Fetches the identity of the node.
    pub async fn id(&self) -> Result<PeerInfo> {
        let IdResponse {
            id,
            public_key,
            addresses,
            agent_version,
            protocols,
        } = self.call_json("id", Query::new()).await?;

        let id = parse_peer_id(&id)?;

        let addresses = addresses
            .unwrap_or_default()
            .into_iter()
            .filter_map(|addr| match addr.parse::<Multiaddr>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    debug!(%addr, "skipping unparseable address: {e}");
                    None
                }
            })
            .collect();

        Ok(PeerInfo {
            id,
            public_key: public_key.unwrap_or_default(),
            addresses,
            agent_version: agent_version.unwrap_or_default(),
            protocols: protocols.unwrap_or_default(),
        })
    }

    pub async fn version(&self) -> Result<VersionInfo> {
        self.call_json("version", Query::new()).await
    }

    /// Asks the daemon to exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.call("shutdown", Query::new()).await?;
        Ok(())
    }

    pub fn swarm(&self) -> Swarm<'_> {
        Swarm::new(self)
    }

    pub fn pin(&self) -> Pin<'_> {
        Pin::new(self)
    }

    pub fn pubsub(&self) -> Pubsub<'_> {
        Pubsub::new(self)
    }

    pub fn name(&self) -> Name<'_> {
        Name::new(self)
    }

    pub fn files(&self) -> Files<'_> {
        Files::new(self)
    }

    pub fn key(&self) -> Key<'_> {
        Key::new(self)
    }
}

pub(crate) fn decode_json<T: DeserializeOwned>(command: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        Error::InvalidResponse(format!(
            "{command}: {e}: {}",
            String::from_utf8_lossy(bytes).trim()
        ))
    })
}

/// Decodes every non empty line of a newline delimited json body.
pub(crate) fn decode_ndjson<T: DeserializeOwned>(command: &str, bytes: &[u8]) -> Result<Vec<T>> {
    bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(|line| decode_json(command, line))
        .collect()
}

/// Sizes are strings in some replies and numbers in others.
pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Lenient>::deserialize(deserializer)? {
        Some(Lenient::Number(n)) => Some(n),
        Some(Lenient::Text(s)) => s.parse().ok(),
        None => None,
    })
}

/// Parses a peer id given either as a base58 multihash or as a `libp2p-key` cid, which is how
/// newer daemons print ipns names (`k51..`).
pub(crate) fn parse_peer_id(s: &str) -> Result<PeerId> {
    if let Ok(peer) = s.parse::<PeerId>() {
        return Ok(peer);
    }
    let cid = s
        .parse::<Cid>()
        .map_err(|e| Error::PeerId(format!("{s}: {e}")))?;
    if cid.codec() != LIBP2P_KEY_CODEC {
        return Err(Error::PeerId(format!("{s}: not a libp2p-key cid")));
    }
    PeerId::from_multihash(*cid.hash())
        .map_err(|_| Error::PeerId(format!("{s}: unsupported multihash")))
}

const LIBP2P_KEY_CODEC: u64 = 0x72;

pub(crate) fn arg(value: impl fmt::Display) -> (&'static str, String) {
    ("arg", value.to_string())
}

pub(crate) fn flag(name: &'static str, value: bool) -> (&'static str, String) {
    (name, value.to_string())
}
