//! Runtime events: types and broadcast channel.
//!
//! This module groups the event **data model** and the **event bus** used to
//! publish/subscribe to events emitted by the supervisor, multiplier tasks and
//! subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`EventBus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor`, `MultiplierTask`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the supervisor's event listener, which fans out to `SubscriberSet`.

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{Event, EventKind};
