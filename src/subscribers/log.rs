//! # LogWriter: events to `tracing`
//!
//! A subscriber that turns incoming [`Event`]s into structured `tracing` records.
//! Pulse-level events are logged at `debug`/`trace`, lifecycle events at `info`,
//! failures at `warn`/`error`.
//!
//! ## Example output
//! ```text
//! INFO  task starting task="x4.clock" channel="clock"
//! DEBUG first pulse swallowed task="x4.clock"
//! TRACE pulse multiplied task="x4.clock" interval_ms=500 subdivisions=3
//! DEBUG stale subdivisions cancelled task="x4.clock" cancelled=2
//! INFO  task stopped task="x4.clock"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::TaskStarting => {
                tracing::info!(task, channel = e.channel.as_deref(), "task starting");
            }
            EventKind::TaskStopped => {
                tracing::info!(task, "task stopped");
            }
            EventKind::TaskFailed => {
                tracing::error!(task, err = e.reason.as_deref(), "task failed");
            }
            EventKind::PulseSwallowed => {
                tracing::debug!(task, "first pulse swallowed");
            }
            EventKind::PulseMultiplied => {
                tracing::trace!(
                    task,
                    interval_ms = e.interval_ms,
                    subdivisions = e.count,
                    "pulse multiplied"
                );
            }
            EventKind::TimersCancelled => {
                tracing::debug!(task, cancelled = e.count, "stale subdivisions cancelled");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(reason = e.reason.as_deref(), "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                tracing::info!("all tasks stopped within grace");
            }
            EventKind::GraceExceeded => {
                tracing::warn!(reason = e.reason.as_deref(), "grace exceeded");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(
                    subscriber = task,
                    reason = e.reason.as_deref(),
                    "subscriber overflow"
                );
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(
                    subscriber = task,
                    info = e.reason.as_deref(),
                    "subscriber panicked"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
