//! # Runtime events emitted by the supervisor and multiplier tasks.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Pulse events**: what a task did with an incoming pulse (swallowed, multiplied, stale timers dropped)
//! - **Lifecycle events**: task start/stop/failure
//! - **Shutdown events**: supervisor stop protocol progress
//!
//! The [`Event`] struct carries additional metadata such as timestamps, task key,
//! learned interval and number of scheduled subdivisions.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use pulsevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::PulseMultiplied)
//!     .with_task("x4.clock")
//!     .with_interval(Duration::from_millis(500))
//!     .with_count(3);
//!
//! assert_eq!(ev.kind, EventKind::PulseMultiplied);
//! assert_eq!(ev.task.as_deref(), Some("x4.clock"));
//! assert_eq!(ev.interval_ms, Some(500));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `task`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `task`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Shutdown events ===
    /// Stop requested (OS signal, task failure or explicit `stop_all`).
    ShutdownRequested,

    /// All tasks reached their stopped state within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some tasks did not stop in time.
    GraceExceeded,

    // === Task lifecycle events ===
    /// Task subscribed to its channel and is waiting for the first pulse.
    ///
    /// Sets:
    /// - `task`: output key
    /// - `channel`: source channel
    TaskStarting,

    /// Task left its receive loop and cancelled its pending timers.
    ///
    /// Sets:
    /// - `task`: output key
    TaskStopped,

    /// Task stopped because of a bus failure.
    ///
    /// Sets:
    /// - `task`: output key
    /// - `reason`: failure message
    TaskFailed,

    // === Pulse events ===
    /// The very first pulse of a task was recorded without any publish.
    ///
    /// Sets:
    /// - `task`: output key
    /// - `channel`: source channel
    PulseSwallowed,

    /// A pulse was republished immediately and its subdivisions were scheduled.
    ///
    /// Sets:
    /// - `task`: output key
    /// - `channel`: source channel
    /// - `interval_ms`: current interval estimate (ms, clamped at 0)
    /// - `count`: number of scheduled subdivisions (`N - 1`)
    PulseMultiplied,

    /// Undelivered subdivisions of the previous period were cancelled.
    ///
    /// Sets:
    /// - `task`: output key
    /// - `count`: number of timers that were still pending
    TimersCancelled,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Output key of the task, or subscriber name for subscriber events.
    pub task: Option<Arc<str>>,
    /// Source channel, if applicable.
    pub channel: Option<Arc<str>>,
    /// Interval estimate in milliseconds (compact).
    pub interval_ms: Option<u32>,
    /// Number of timers scheduled or cancelled.
    pub count: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            channel: None,
            interval_ms: None,
            count: None,
            reason: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a task key.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a source channel.
    #[inline]
    pub fn with_channel(mut self, channel: impl Into<Arc<str>>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Attaches an interval (stored as milliseconds).
    #[inline]
    pub fn with_interval(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.interval_ms = Some(ms);
        self
    }

    /// Attaches a timer count.
    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(u32::try_from(n).unwrap_or(u32::MAX));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}
