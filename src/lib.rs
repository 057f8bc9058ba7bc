//! # pulsevisor
//!
//! **Pulsevisor** is an adaptive clock multiplier on top of a pub/sub bus.
//!
//! For every `(channel, multiplier)` pair it learns the period between the
//! pulses arriving on `channel` and republishes each pulse `N` times, evenly
//! spaced over the learned period, under the key `x{N}.{channel}`.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   channels × multipliers ──► SupervisorBuilder ──► Supervisor
//!                                                       │ one per pair
//!            ┌──────────────────────────┬───────────────┴──────────┐
//!            ▼                          ▼                          ▼
//!   ┌──────────────────┐       ┌──────────────────┐       ┌──────────────────┐
//!   │  MultiplierTask  │       │  MultiplierTask  │       │  MultiplierTask  │
//!   │    x2.clock      │       │    x4.clock      │       │    x2.gate       │
//!   │ IntervalEstimator│       │ IntervalEstimator│       │ IntervalEstimator│
//!   │ TimerSet         │       │ TimerSet         │       │ TimerSet         │
//!   └───┬──────────▲───┘       └───┬──────────▲───┘       └───┬──────────▲───┘
//!       │ publish  │ recv          │          │               │          │
//!       ▼          │               ▼          │               ▼          │
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │  PubSub (RedisBus / MemoryBus): source channels, control channel, x{N}.*   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//!
//!   MultiplierTask ── Event ──► EventBus ──► listener ──► AliveTracker
//!                                                └──────► SubscriberSet ──► LogWriter, ...
//! ```
//!
//! ### Per pulse
//! ```text
//! recv() ──► running? ──no──► STOPPED
//!               │yes
//!               ▼
//!     TimerSet::cancel_all()               (stale subdivisions never fire)
//!               │
//!     IntervalEstimator::observe(now)
//!        ├─ None      ──► first pulse, swallowed
//!        └─ Some(T)   ──► publish(x{N}.channel, v) now
//!                         schedule v at T·k/N, k = 1..N-1
//! ```
//!
//! ## Features
//! | Area              | Description                                                | Key types / traits                       |
//! |-------------------|------------------------------------------------------------|------------------------------------------|
//! | **Clock**         | Interval learning, subdivision plan, cancellable timers.   | [`IntervalEstimator`], [`plan`], [`TimerSet`] |
//! | **Supervision**   | Task set, broadcast stop protocol, grace period.           | [`Supervisor`], [`SupervisorBuilder`]    |
//! | **Bus**           | Pub/sub seam and its backends.                             | [`PubSub`], [`MemoryBus`], `RedisBus`    |
//! | **Subscriber API**| Hook into lifecycle and pulse events.                      | [`Subscribe`], [`LogWriter`]             |
//! | **Errors**        | Typed errors for configuration, bus, tasks and runtime.    | [`ConfigError`], [`BusError`], [`TaskError`], [`RuntimeError`] |
//! | **Configuration** | Runtime settings and the TOML file format.                 | [`Config`], [`Settings`]                 |
//!
//! ## Optional features
//! - `redis` (default): the `RedisBus` backend.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pulsevisor::{Config, MemoryBus, PubSub, SupervisorBuilder};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = MemoryBus::default();
//!     let mut sup = SupervisorBuilder::new(Config::default(), Arc::new(bus.clone()))
//!         .with_channels(["clock"])
//!         .with_multipliers([4])
//!         .build()?;
//!     sup.start().await?;
//!
//!     bus.publish("clock", b"1").await?;
//!     tokio::time::sleep(Duration::from_millis(20)).await;
//!     bus.publish("clock", b"1").await?;
//!     tokio::time::sleep(Duration::from_millis(30)).await;
//!
//!     sup.stop_all().await?;
//!     assert_eq!(bus.get("x4.clock").as_deref(), Some(&b"1"[..]));
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod clock;
mod core;
mod error;
pub mod events;
pub mod settings;
pub mod subscribers;

pub use crate::core::{
    AliveTracker, Config, DEFAULT_CONTROL_CHANNEL, PulseCounter, Supervisor, SupervisorBuilder,
};
pub use bus::{BusRef, MemoryBus, Message, PubSub, Subscription};
#[cfg(feature = "redis")]
pub use bus::RedisBus;
pub use clock::{
    IntervalEstimator, MultiplierSpec, MultiplierTask, Phase, RunFlag, TimerHandle, TimerSet,
    output_key, plan,
};
pub use error::{BusError, ConfigError, RuntimeError, TaskError};
pub use events::{Event, EventBus, EventKind};
pub use settings::Settings;
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
