use std::fmt;
use std::pin::Pin as StdPin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures::stream::{BoxStream, FusedStream, Stream};
use futures::StreamExt;
use libp2p::PeerId;
use multibase::Base;
use serde::Deserialize;

use super::{arg, decode_json, parse_peer_id, IpfsClient, Query, Strings};
use crate::error::{Error, Result};

/// `pubsub` commands. Topics and payloads travel multibase encoded.
#[derive(Debug, Clone, Copy)]
pub struct Pubsub<'a> {
    client: &'a IpfsClient,
}

/// A message received on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubsubMessage {
    pub from: PeerId,
    pub data: Vec<u8>,
    pub seqno: Vec<u8>,
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MessageLine {
    from: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    seqno: Option<String>,
    #[serde(default, rename = "topicIDs")]
    topic_ids: Option<Vec<String>>,
}

impl TryFrom<MessageLine> for PubsubMessage {
    type Error = Error;

    fn try_from(line: MessageLine) -> Result<Self> {
        let MessageLine {
            from,
            data,
            seqno,
            topic_ids,
        } = line;

        let topics = topic_ids
            .unwrap_or_default()
            .iter()
            .map(|topic| decode_topic(topic))
            .collect::<Result<Vec<_>>>()?;

        Ok(PubsubMessage {
            from: parse_peer_id(&from)?,
            data: data.as_deref().map(decode).transpose()?.unwrap_or_default(),
            seqno: seqno.as_deref().map(decode).transpose()?.unwrap_or_default(),
            topics,
        })
    }
}

/// Stream of messages of a single subscription. The subscription ends when this is dropped.
#[must_use = "the subscription is cancelled when dropped"]
pub struct SubscriptionStream {
    topic: String,
    inner: BoxStream<'static, Result<PubsubMessage>>,
    done: bool,
}

impl fmt::Debug for SubscriptionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("topic", &self.topic)
            .field("done", &self.done)
            .finish()
    }
}

impl SubscriptionStream {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Stream for SubscriptionStream {
    type Item = Result<PubsubMessage>;

    fn poll_next(mut self: StdPin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        let item = futures::ready!(self.inner.poll_next_unpin(cx));
        if item.is_none() {
            self.done = true;
        }
        Poll::Ready(item)
    }
}

impl FusedStream for SubscriptionStream {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl<'a> Pubsub<'a> {
    pub(crate) fn new(client: &'a IpfsClient) -> Self {
        Self { client }
    }

    /// Subscribes to `topic`. Returns once the daemon has accepted the subscription.
    pub async fn subscribe(&self, topic: &str) -> Result<SubscriptionStream> {
        let query = vec![arg(encode_topic(topic))];
        let response = self.client.call("pubsub/sub", query).await?;
        debug!(topic, "subscribed");

        let mut body = response.bytes_stream();
        let inner: BoxStream<'static, Result<PubsubMessage>> = async_stream::try_stream! {
            let mut buffer = BytesMut::new();
            while let Some(chunk) = body.next().await {
                buffer.extend_from_slice(&chunk.map_err(Error::from)?);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line = buffer.split_to(pos + 1);
                    let line = &line[..pos];
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    let line: MessageLine = decode_json("pubsub/sub", line)?;
                    yield PubsubMessage::try_from(line)?;
                }
            }
            if !buffer.iter().all(u8::is_ascii_whitespace) {
                let line: MessageLine = decode_json("pubsub/sub", &buffer)?;
                yield PubsubMessage::try_from(line)?;
            }
        }
        .boxed();

        Ok(SubscriptionStream {
            topic: topic.to_string(),
            inner,
            done: false,
        })
    }

    pub async fn publish(&self, topic: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let query = vec![arg(encode_topic(topic))];
        self.client
            .call_with_data("pubsub/pub", query, data.into())
            .await?;
        Ok(())
    }

    /// Peers the node knows to be subscribed to `topic`.
    pub async fn peers(&self, topic: &str) -> Result<Vec<PeerId>> {
        let strings: Strings = self
            .client
            .call_json("pubsub/peers", vec![arg(encode_topic(topic))])
            .await?;
        strings
            .into_vec()
            .iter()
            .map(|peer| parse_peer_id(peer))
            .collect()
    }

    /// Topics the node is subscribed to.
    pub async fn ls(&self) -> Result<Vec<String>> {
        let strings: Strings = self.client.call_json("pubsub/ls", Query::new()).await?;
        let mut topics = strings
            .into_vec()
            .iter()
            .map(|topic| decode_topic(topic))
            .collect::<Result<Vec<_>>>()?;
        topics.sort();
        Ok(topics)
    }
}

pub(crate) fn encode_topic(topic: &str) -> String {
    multibase::encode(Base::Base64Url, topic.as_bytes())
}

fn decode(value: &str) -> Result<Vec<u8>> {
    multibase::decode(value)
        .map(|(_, bytes)| bytes)
        .map_err(|e| Error::InvalidResponse(format!("invalid multibase {value:?}: {e}")))
}

fn decode_topic(topic: &str) -> Result<String> {
    let bytes = decode(topic)?;
    String::from_utf8(bytes)
        .map_err(|e| Error::InvalidResponse(format!("topic is not utf-8: {e}")))
}
