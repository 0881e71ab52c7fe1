use std::fmt;
use std::time::Duration;

use libp2p::PeerId;
use multibase::Base;
use serde::Deserialize;

use super::{arg, flag, IpfsClient};
use crate::error::Result;

/// `name` (ipns) commands.
#[derive(Debug, Clone, Copy)]
pub struct Name<'a> {
    client: &'a IpfsClient,
}

#[derive(Clone, Debug, Default)]
pub struct NamePublishOptions {
    /// Name of the key to publish under; the node's own key when unset.
    pub key: Option<String>,
    /// Validity of the record.
    pub lifetime: Option<Duration>,
    pub ttl: Option<Duration>,
    /// Publish without connected peers. Needed by offline nodes.
    pub allow_offline: bool,
    /// Check that the path resolves before publishing. Daemon default when unset.
    pub resolve: Option<bool>,
}

impl NamePublishOptions {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn allow_offline(mut self) -> Self {
        self.allow_offline = true;
        self
    }

    pub fn resolve(mut self, resolve: bool) -> Self {
        self.resolve = Some(resolve);
        self
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NameResolveOptions {
    pub recursive: bool,
    /// Skip the local cache and go to the network or pubsub.
    pub nocache: bool,
}

impl Default for NameResolveOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            nocache: false,
        }
    }
}

/// Result of `name/publish`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamePublished {
    /// The ipns name, a peer id in some encoding.
    pub name: String,
    /// The published path, e.g. `/ipfs/<cid>`.
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResolveResponse {
    path: String,
}

/// Pubsub topic that carries the ipns records of `name` when ipns over pubsub is enabled.
pub fn pubsub_topic(name: &PeerId) -> String {
    let mut key = b"/ipns/".to_vec();
    key.extend_from_slice(&name.to_bytes());
    // multibase prefix dropped
    let encoded = multibase::encode(Base::Base64Url, key);
    format!("/record/{}", &encoded[1..])
}

/// Durations in the syntax both daemons parse, e.g. `90s`.
fn go_duration(duration: Duration) -> String {
    match duration.subsec_millis() {
        0 => format!("{}s", duration.as_secs()),
        _ => format!("{}ms", duration.as_millis()),
    }
}

impl<'a> Name<'a> {
    pub(crate) fn new(client: &'a IpfsClient) -> Self {
        Self { client }
    }

    pub async fn publish(
        &self,
        path: impl fmt::Display,
        options: &NamePublishOptions,
    ) -> Result<NamePublished> {
        let mut query = vec![arg(path)];
        if let Some(key) = &options.key {
            query.push(("key", key.clone()));
        }
        if let Some(lifetime) = options.lifetime {
            query.push(("lifetime", go_duration(lifetime)));
        }
        if let Some(ttl) = options.ttl {
            query.push(("ttl", go_duration(ttl)));
        }
        if options.allow_offline {
            query.push(flag("allow-offline", true));
        }
        if let Some(resolve) = options.resolve {
            query.push(flag("resolve", resolve));
        }

        let published: NamePublished = self.client.call_json("name/publish", query).await?;
        debug!(name = %published.name, value = %published.value, "published");
        Ok(published)
    }

    /// Resolves `name` to the path it points at.
    pub async fn resolve(
        &self,
        name: impl fmt::Display,
        options: NameResolveOptions,
    ) -> Result<String> {
        let query = vec![
            arg(name),
            flag("recursive", options.recursive),
            flag("nocache", options.nocache),
        ];
        let ResolveResponse { path } = self.client.call_json("name/resolve", query).await?;
        Ok(path)
    }
}
