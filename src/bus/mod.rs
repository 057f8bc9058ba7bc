//! # Pub/sub bus seam.
//!
//! The scheduler only needs two primitives from its bus collaborator:
//! - [`PubSub::subscribe`] a receiver to a set of channels, then
//!   [`Subscription::recv`] one message at a time, in arrival order;
//! - [`PubSub::publish`] a value under a key (stored **and** broadcast on the
//!   channel of the same name, so downstream modules can read it as a control
//!   value or react to it as a trigger).
//!
//! ```text
//!               subscribe([channel, control])           publish("x4.clock", v)
//!  MultiplierTask ─────────────────────────► PubSub ◄───────────────────── Timer
//!        ▲                                     │
//!        └────────── Subscription::recv() ◄────┘
//! ```
//!
//! Backends:
//! - [`MemoryBus`] in-process, built on `tokio::sync::broadcast`;
//! - [`RedisBus`] (feature `redis`) Redis `SET` + `PUBLISH` / `SUBSCRIBE`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusError;

mod memory;
mod message;
#[cfg(feature = "redis")]
mod redis;

pub use memory::{MemoryBus, MemorySubscription};
pub use message::Message;
#[cfg(feature = "redis")]
pub use self::redis::RedisBus;

/// Shared handle to a bus backend.
pub type BusRef = Arc<dyn PubSub>;

/// A bus backend: key/value writes plus channel subscriptions.
#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    /// Subscribes a single receiver to every channel in `channels`.
    ///
    /// Only messages published **after** this call returns are guaranteed to be seen.
    async fn subscribe(&self, channels: &[String]) -> Result<Box<dyn Subscription>, BusError>;

    /// Stores `value` under `key` and broadcasts it on channel `key`.
    ///
    /// `value` is opaque bytes and is stored as-is.
    async fn publish(&self, key: &str, value: &[u8]) -> Result<(), BusError>;
}

/// Receiving end of a subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Blocks until the next message arrives.
    ///
    /// Returns `Ok(None)` only when the bus was closed on purpose (e.g.
    /// [`MemoryBus::close`]). A connection that drops underneath the
    /// subscription is a [`BusError::Receive`].
    async fn recv(&mut self) -> Result<Option<Message>, BusError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::{MemoryBus, PubSub, Subscription};
    use crate::error::BusError;

    /// Memory bus whose publishes can be switched to fail while subscriptions stay open.
    pub(crate) struct FlakyBus {
        pub(crate) inner: MemoryBus,
        broken: AtomicBool,
    }

    impl FlakyBus {
        pub(crate) fn new() -> Self {
            Self {
                inner: MemoryBus::default(),
                broken: AtomicBool::new(false),
            }
        }

        pub(crate) fn break_publishes(&self) {
            self.broken.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl PubSub for FlakyBus {
        async fn subscribe(&self, channels: &[String]) -> Result<Box<dyn Subscription>, BusError> {
            self.inner.subscribe(channels).await
        }

        async fn publish(&self, key: &str, value: &[u8]) -> Result<(), BusError> {
            if self.broken.load(Ordering::Acquire) {
                return Err(BusError::Publish {
                    key: key.to_string(),
                    reason: "connection reset".into(),
                });
            }
            self.inner.publish(key, value).await
        }
    }
}
