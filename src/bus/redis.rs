//! # Redis bus backend (feature `redis`).
//!
//! - `publish` issues `SET key value` followed by `PUBLISH key value` on a shared
//!   multiplexed connection.
//! - `subscribe` opens a dedicated pub/sub connection per subscription. The
//!   server never ends that stream on its own, so its end is reported as
//!   [`BusError::Receive`] rather than a clean close.
//! - Payloads travel as raw bytes in both directions.

use std::pin::Pin;

use ::redis::AsyncCommands;
use async_trait::async_trait;
use futures::{Stream, StreamExt};

use super::{Message, PubSub, Subscription};
use crate::error::BusError;

/// Bus backed by a Redis server.
pub struct RedisBus {
    client: ::redis::Client,
    conn: ::redis::aio::MultiplexedConnection,
}

impl RedisBus {
    /// Connects to `url` (e.g. `redis://localhost:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = ::redis::Client::open(url).map_err(|e| BusError::Connect {
            reason: e.to_string(),
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Connect {
                reason: e.to_string(),
            })?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl PubSub for RedisBus {
    async fn subscribe(&self, channels: &[String]) -> Result<Box<dyn Subscription>, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Connect {
                reason: e.to_string(),
            })?;
        for channel in channels {
            pubsub
                .subscribe(channel.as_str())
                .await
                .map_err(|e| BusError::Subscribe {
                    channel: channel.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(Box::new(RedisSubscription {
            stream: Box::pin(pubsub.into_on_message()),
        }))
    }

    async fn publish(&self, key: &str, value: &[u8]) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let fail = |e: ::redis::RedisError| BusError::Publish {
            key: key.to_string(),
            reason: e.to_string(),
        };
        conn.set::<_, _, ()>(key, value).await.map_err(fail)?;
        conn.publish::<_, _, ()>(key, value).await.map_err(fail)?;
        Ok(())
    }
}

struct RedisSubscription {
    stream: Pin<Box<dyn Stream<Item = ::redis::Msg> + Send>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn recv(&mut self) -> Result<Option<Message>, BusError> {
        match self.stream.next().await {
            Some(msg) => Ok(Some(Message::new(
                msg.get_channel_name(),
                msg.get_payload_bytes(),
            ))),
            None => Err(BusError::Receive {
                reason: "pub/sub connection closed".into(),
            }),
        }
    }
}
