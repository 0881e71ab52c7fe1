use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ipld_core::cid::Cid;
use serde::Deserialize;

use super::{arg, flag, IpfsClient, Query};
use crate::error::{Error, Result};

/// `pin` commands.
#[derive(Debug, Clone, Copy)]
pub struct Pin<'a> {
    client: &'a IpfsClient,
}

/// How a block is pinned.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum PinMode {
    Indirect,
    Direct,
    Recursive,
}

impl PinMode {
    fn as_str(&self) -> &'static str {
        match self {
            PinMode::Indirect => "indirect",
            PinMode::Direct => "direct",
            PinMode::Recursive => "recursive",
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PinMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // `pin/ls` with an argument reports indirect pins as "indirect through <cid>"
        match s {
            "recursive" => Ok(PinMode::Recursive),
            "direct" => Ok(PinMode::Direct),
            s if s.starts_with("indirect") => Ok(PinMode::Indirect),
            other => Err(Error::InvalidResponse(format!("unknown pin type {other}"))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PinListOptions {
    /// Only list the given roots.
    pub cids: Vec<Cid>,
    /// Only list pins of this mode; every mode when unset.
    pub mode: Option<PinMode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinsResponse {
    #[serde(default)]
    pins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinLsResponse {
    #[serde(default)]
    keys: Option<HashMap<String, PinLsEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinLsEntry {
    #[serde(rename = "Type")]
    kind: String,
}

impl<'a> Pin<'a> {
    pub(crate) fn new(client: &'a IpfsClient) -> Self {
        Self { client }
    }

    pub async fn add(&self, cid: &Cid, recursive: bool) -> Result<Vec<Cid>> {
        let response: PinsResponse = self
            .client
            .call_json("pin/add", vec![arg(cid), flag("recursive", recursive)])
            .await?;
        parse_cids(response.pins.unwrap_or_default())
    }

    pub async fn rm(&self, cid: &Cid, recursive: bool) -> Result<Vec<Cid>> {
        let response: PinsResponse = self
            .client
            .call_json("pin/rm", vec![arg(cid), flag("recursive", recursive)])
            .await?;
        parse_cids(response.pins.unwrap_or_default())
    }

    /// Lists pins, sorted by cid so listings from different implementations compare equal.
    pub async fn ls(&self, options: &PinListOptions) -> Result<Vec<(Cid, PinMode)>> {
        let mut query: Query = options.cids.iter().map(arg).collect();
        query.push((
            "type",
            options
                .mode
                .map(|mode| mode.to_string())
                .unwrap_or_else(|| "all".into()),
        ));

        let PinLsResponse { keys } = self.client.call_json("pin/ls", query).await?;

        let mut pins = keys
            .unwrap_or_default()
            .into_iter()
            .map(|(cid, entry)| -> Result<(Cid, PinMode)> {
                Ok((cid.parse()?, entry.kind.parse()?))
            })
            .collect::<Result<Vec<_>>>()?;

        pins.sort_by_key(|(cid, _)| cid.to_bytes());
        Ok(pins)
    }

    /// Whether `cid` is pinned in any mode.
    pub async fn is_pinned(&self, cid: &Cid) -> Result<bool> {
        let options = PinListOptions {
            cids: vec![*cid],
            mode: None,
        };

        match self.ls(&options).await {
            Ok(pins) => Ok(pins.iter().any(|(pinned, _)| pinned == cid)),
            // both implementations fail the listing of a specific cid that is not pinned
            Err(Error::Rpc { message, .. }) if message.contains("not pinned") => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn parse_cids(cids: Vec<String>) -> Result<Vec<Cid>> {
    cids.into_iter()
        .map(|cid| cid.parse::<Cid>().map_err(Error::from))
        .collect()
}
