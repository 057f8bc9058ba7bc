//! # Event subscribers for the pulsevisor runtime.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out,
//! and the built-in [`LogWriter`].
//!
//! ```text
//! MultiplierTask ── publish(Event) ──► EventBus ──► event listener ──► SubscriberSet
//!                                                                        │
//!                                                          ┌─────────────┼─────────┐
//!                                                          ▼             ▼         ▼
//!                                                      LogWriter      Custom      ...
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
