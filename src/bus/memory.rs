//! # In-process bus backend.
//!
//! [`MemoryBus`] keeps a single broadcast ring buffer shared by every
//! subscription (each receiver filters the channels it asked for) and a
//! key/value map holding the last value published under each key.
//!
//! ## Rules
//! - **Arrival order**: messages are seen in publish order, across channels too.
//! - **Lag handling**: a receiver that falls more than `capacity` messages behind
//!   skips the oldest ones and logs a warning; lost pulses are not an error.
//! - **Close**: [`MemoryBus::close`] ends every subscription (`recv` returns
//!   `Ok(None)`) and makes further publishes fail.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use super::{Message, PubSub, Subscription};
use crate::error::BusError;

/// Default ring buffer size.
pub const DEFAULT_CAPACITY: usize = 4096;

struct Inner {
    tx: broadcast::Sender<Message>,
    store: RwLock<HashMap<String, Arc<[u8]>>>,
    closed: CancellationToken,
}

/// In-process pub/sub bus with a key/value store.
///
/// Cheap to clone; all clones share the same channel and store.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    /// Creates a bus whose ring buffer holds `capacity` messages (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                tx,
                store: RwLock::new(HashMap::new()),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Returns the last value published under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        self.inner
            .store
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Closes the bus: subscriptions end and publishes fail from now on.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Subscribes without boxing; see [`PubSub::subscribe`].
    pub fn subscribe_local(&self, channels: &[String]) -> MemorySubscription {
        MemorySubscription {
            rx: self.inner.tx.subscribe(),
            channels: channels.iter().cloned().collect(),
            closed: self.inner.closed.clone(),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl PubSub for MemoryBus {
    async fn subscribe(&self, channels: &[String]) -> Result<Box<dyn Subscription>, BusError> {
        if self.is_closed() {
            return Err(BusError::Subscribe {
                channel: channels.join(","),
                reason: "bus closed".into(),
            });
        }
        Ok(Box::new(self.subscribe_local(channels)))
    }

    async fn publish(&self, key: &str, value: &[u8]) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Publish {
                key: key.to_string(),
                reason: "bus closed".into(),
            });
        }
        let msg = Message::new(key, value);
        self.inner
            .store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), Arc::clone(&msg.payload));
        // no receivers is not an error: nobody listens to this key yet
        let _ = self.inner.tx.send(msg);
        Ok(())
    }
}

/// Receiver side of a [`MemoryBus`] subscription.
pub struct MemorySubscription {
    rx: broadcast::Receiver<Message>,
    channels: HashSet<String>,
    closed: CancellationToken,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Result<Option<Message>, BusError> {
        loop {
            let res = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Ok(None),
                res = self.rx.recv() => res,
            };
            match res {
                Ok(msg) if self.channels.contains(&*msg.channel) => return Ok(Some(msg)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "memory bus subscription lagged");
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn filters_channels_and_keeps_order() {
        let bus = MemoryBus::default();
        let mut sub = bus.subscribe(&channels(&["clock", "ctl"])).await.unwrap();

        bus.publish("clock", b"1").await.unwrap();
        bus.publish("other", b"x").await.unwrap();
        bus.publish("ctl", b"2").await.unwrap();

        assert_eq!(sub.recv().await.unwrap(), Some(Message::new("clock", "1")));
        assert_eq!(sub.recv().await.unwrap(), Some(Message::new("ctl", "2")));
    }

    #[tokio::test]
    async fn publish_stores_last_value() {
        let bus = MemoryBus::default();
        bus.publish("x2.clock", b"0.5").await.unwrap();
        bus.publish("x2.clock", b"0.7").await.unwrap();
        assert_eq!(bus.get("x2.clock").as_deref(), Some(&b"0.7"[..]));
        assert_eq!(bus.get("missing"), None);
    }

    #[tokio::test]
    async fn binary_payloads_pass_unchanged() {
        let bus = MemoryBus::default();
        let mut sub = bus.subscribe(&channels(&["clock"])).await.unwrap();
        let raw: [u8; 4] = [0xff, 0xfe, 0x00, 0x80];

        bus.publish("clock", &raw).await.unwrap();

        let msg = sub.recv().await.unwrap().unwrap();
        assert_eq!(&*msg.payload, &raw[..]);
        assert_eq!(bus.get("clock").as_deref(), Some(&raw[..]));
    }

    #[tokio::test]
    async fn close_ends_subscriptions_and_fails_publish() {
        let bus = MemoryBus::default();
        let mut sub = bus.subscribe(&channels(&["clock"])).await.unwrap();
        bus.close();

        assert_eq!(sub.recv().await.unwrap(), None);
        let err = bus.publish("clock", b"1").await.unwrap_err();
        assert_eq!(err.as_label(), "bus_publish");
        assert!(bus.subscribe(&channels(&["clock"])).await.is_err());
    }

    #[tokio::test]
    async fn lagging_receiver_skips_to_recent_messages() {
        let bus = MemoryBus::new(2);
        let mut sub = bus.subscribe_local(&channels(&["clock"]));
        for v in ["1", "2", "3", "4"] {
            bus.publish("clock", v.as_bytes()).await.unwrap();
        }
        assert_eq!(sub.recv().await.unwrap(), Some(Message::new("clock", "3")));
        assert_eq!(sub.recv().await.unwrap(), Some(Message::new("clock", "4")));
    }
}
