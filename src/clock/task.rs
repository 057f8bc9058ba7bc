//! # MultiplierTask: one `(channel, multiplier)` pair.
//!
//! Listens to its source channel (and the shared control channel), learns the
//! inter-pulse period, and republishes every pulse `N` times per period at
//! `x{N}.{channel}`.
//!
//! ## State machine
//! ```text
//!           first pulse               second pulse
//!   INIT ───────────────► ESTIMATING ─────────────► RUNNING ◄─┐
//!    │   (swallowed, no      │         publish now +     │     │ next pulse:
//!    │    publish)           │         schedule N-1      └─────┘ cancel stale,
//!    │                       │                                 publish now,
//!    └───────────────────────┴──────────► STOPPED ◄────────────  schedule N-1
//!          stop flag + next message / bus closed on purpose / bus failure
//! ```
//!
//! ## Rules
//! - The very first pulse only starts the clock: no output until the second one.
//! - Stale subdivisions are cancelled **before** the new pulse is handled, so a
//!   slow period never bleeds into a faster one.
//! - Subdivisions replay the payload of the pulse that scheduled them.
//! - The `running` flag is checked right after each receive, before any state changes.
//! - A failed publish (immediate or delayed) stops the task with [`TaskError::Bus`],
//!   and so does a subscription that fails or drops underneath the task.
//! - Payloads are opaque bytes, republished unchanged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::bus::{BusRef, Subscription};
use crate::clock::timers::deadline_after;
use crate::clock::{IntervalEstimator, MultiplierSpec, TimerSet, plan};
use crate::core::PulseCounter;
use crate::error::{BusError, TaskError};
use crate::events::{Event, EventBus, EventKind};

/// Lifecycle phase of a [`MultiplierTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No pulse observed yet.
    Init,
    /// One pulse observed; the interval is still unknown.
    Estimating,
    /// Interval known; every pulse is multiplied.
    Running,
    /// Terminal.
    Stopped,
}

/// Shared `running` switch of a task.
///
/// Clearing it does not wake the task by itself: the task notices on its next
/// received message (real pulse or control broadcast).
#[derive(Clone, Debug)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// What woke the receive loop.
enum Wake {
    Received(Result<Option<crate::bus::Message>, BusError>),
    TimerFailed(BusError),
}

/// Adaptive clock multiplier for one `(channel, multiplier)` pair.
pub struct MultiplierTask {
    spec: MultiplierSpec,
    key: Arc<str>,
    control_channel: Arc<str>,
    bus: BusRef,
    events: EventBus,
    pulses: PulseCounter,
    running: RunFlag,
    estimator: IntervalEstimator,
    timers: TimerSet,
    phase: Phase,
    failures_tx: mpsc::UnboundedSender<BusError>,
    failures_rx: mpsc::UnboundedReceiver<BusError>,
}

impl MultiplierTask {
    /// Creates a task in the [`Phase::Init`] state.
    pub fn new(
        spec: MultiplierSpec,
        control_channel: impl Into<Arc<str>>,
        bus: BusRef,
        events: EventBus,
        pulses: PulseCounter,
    ) -> Self {
        let key: Arc<str> = spec.output_key().into();
        let estimator = IntervalEstimator::new(spec.learning_rate());
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            spec,
            key,
            control_channel: control_channel.into(),
            bus,
            events,
            pulses,
            running: RunFlag::new(),
            estimator,
            timers: TimerSet::new(),
            phase: Phase::Init,
            failures_tx,
            failures_rx,
        }
    }

    /// Output key (`x{N}.{channel}`).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn spec(&self) -> &MultiplierSpec {
        &self.spec
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current interval estimate in seconds.
    pub fn interval(&self) -> Option<f64> {
        self.estimator.interval()
    }

    /// Handle to this task's `running` flag.
    pub fn run_flag(&self) -> RunFlag {
        self.running.clone()
    }

    /// Channels the task must be subscribed to: its source and the control channel.
    pub fn channels(&self) -> Vec<String> {
        vec![
            self.spec.channel().to_string(),
            self.control_channel.to_string(),
        ]
    }

    /// Runs the receive loop until stopped, then cancels pending subdivisions.
    ///
    /// `subscription` must cover [`channels`](Self::channels); subscribing
    /// before spawning guarantees no pulse published after start is missed.
    pub async fn run(mut self, mut subscription: Box<dyn Subscription>) -> Result<(), TaskError> {
        self.events.publish(
            Event::new(EventKind::TaskStarting)
                .with_task(Arc::clone(&self.key))
                .with_channel(self.spec.channel_arc()),
        );

        let res = self.receive_loop(subscription.as_mut()).await;
        self.stop().await;

        match &res {
            Ok(()) => self
                .events
                .publish(Event::new(EventKind::TaskStopped).with_task(Arc::clone(&self.key))),
            Err(e) => self.events.publish(
                Event::new(EventKind::TaskFailed)
                    .with_task(Arc::clone(&self.key))
                    .with_reason(e.to_string()),
            ),
        }
        res
    }

    async fn receive_loop(&mut self, subscription: &mut dyn Subscription) -> Result<(), TaskError> {
        loop {
            let wake = tokio::select! {
                Some(err) = self.failures_rx.recv() => Wake::TimerFailed(err),
                res = subscription.recv() => Wake::Received(res),
            };
            let received = match wake {
                Wake::TimerFailed(err) => return Err(self.fail(err)),
                Wake::Received(res) => res,
            };
            if !self.running.is_running() {
                return Ok(());
            }
            let msg = match received {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    tracing::debug!(task = %self.key, "subscription closed");
                    return Ok(());
                }
                Err(err) => return Err(self.fail(err)),
            };
            if msg.channel == self.control_channel || *msg.channel != *self.spec.channel() {
                continue;
            }
            let now = Instant::now();
            if let Err(err) = self.handle_pulse(msg.payload, now).await {
                return Err(self.fail(err));
            }
        }
    }

    /// Applies one real pulse that arrived at `now`.
    pub(crate) async fn handle_pulse(
        &mut self,
        payload: Arc<[u8]>,
        now: Instant,
    ) -> Result<(), BusError> {
        self.pulses.increment();

        let cancelled = self.timers.cancel_all();
        if cancelled > 0 {
            self.events.publish(
                Event::new(EventKind::TimersCancelled)
                    .with_task(Arc::clone(&self.key))
                    .with_count(cancelled),
            );
        }

        let Some(interval) = self.estimator.observe(now) else {
            self.phase = Phase::Estimating;
            self.events.publish(
                Event::new(EventKind::PulseSwallowed)
                    .with_task(Arc::clone(&self.key))
                    .with_channel(self.spec.channel_arc()),
            );
            return Ok(());
        };

        self.bus.publish(&self.key, &payload).await?;

        let delays = plan(interval, self.spec.multiplier());
        for delay in &delays {
            let deadline = deadline_after(now, *delay);
            let bus = Arc::clone(&self.bus);
            let key = Arc::clone(&self.key);
            let payload = Arc::clone(&payload);
            let failures = self.failures_tx.clone();
            self.timers.schedule_at(deadline, async move {
                if let Err(err) = bus.publish(&key, &payload).await {
                    let _ = failures.send(err);
                }
            });
        }
        self.phase = Phase::Running;

        let period = Duration::try_from_secs_f64(interval.max(0.0)).unwrap_or(Duration::MAX);
        self.events.publish(
            Event::new(EventKind::PulseMultiplied)
                .with_task(Arc::clone(&self.key))
                .with_channel(self.spec.channel_arc())
                .with_interval(period)
                .with_count(delays.len()),
        );
        Ok(())
    }

    /// Enters [`Phase::Stopped`]: clears the flag and drops every pending subdivision.
    async fn stop(&mut self) {
        self.running.stop();
        self.timers.shutdown().await;
        self.phase = Phase::Stopped;
    }

    fn fail(&self, source: BusError) -> TaskError {
        TaskError::Bus {
            task: self.key.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::FlakyBus;
    use crate::bus::{MemoryBus, PubSub};
    use std::sync::Mutex;

    const CONTROL: &str = "ctl";

    type Seen = Arc<Mutex<Vec<(String, Duration)>>>;

    fn task(bus: &MemoryBus, multiplier: u32, lr: f64) -> MultiplierTask {
        let spec = MultiplierSpec::new("clock", multiplier, lr).unwrap();
        MultiplierTask::new(
            spec,
            CONTROL,
            Arc::new(bus.clone()),
            EventBus::new(64),
            PulseCounter::default(),
        )
    }

    fn bytes(s: &str) -> Arc<[u8]> {
        Arc::from(s.as_bytes())
    }

    /// Records every value published under `key` with its time since `base`.
    fn record_outputs(bus: &MemoryBus, key: &str, base: Instant) -> Seen {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let mut sub = bus.subscribe_local(&[key.to_string()]);
        let sink = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Ok(Some(msg)) = sub.recv().await {
                let value = String::from_utf8_lossy(&msg.payload).into_owned();
                sink.lock().unwrap().push((value, base.elapsed()));
            }
        });
        seen
    }

    fn times(seen: &Seen) -> Vec<f64> {
        seen.lock().unwrap().iter().map(|(_, t)| t.as_secs_f64()).collect()
    }

    fn assert_times(got: &[f64], expected: &[f64]) {
        assert_eq!(got.len(), expected.len(), "got {got:?}, expected {expected:?}");
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() <= 0.002, "got {got:?}, expected {expected:?}");
        }
    }

    async fn pulse_at(bus: &MemoryBus, base: Instant, secs: f64, value: &str) {
        tokio::time::sleep_until(base + Duration::from_secs_f64(secs)).await;
        bus.publish("clock", value.as_bytes()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn first_pulse_is_swallowed() {
        let bus = MemoryBus::default();
        let base = Instant::now();
        let seen = record_outputs(&bus, "x4.clock", base);
        let mut t = task(&bus, 4, 1.0);
        let mut events = t.events.subscribe();

        t.handle_pulse(bytes("1"), Instant::now()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(t.phase(), Phase::Estimating);
        assert_eq!(t.interval(), None);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.get("x4.clock"), None);
        assert_eq!(t.pulses.get(), 1);
        assert_eq!(events.recv().await.unwrap().kind, EventKind::PulseSwallowed);
    }

    #[tokio::test(start_paused = true)]
    async fn subdivides_learned_interval() {
        let bus = MemoryBus::default();
        let base = Instant::now();
        let seen = record_outputs(&bus, "x4.clock", base);
        let mut t = task(&bus, 4, 1.0);

        tokio::time::sleep_until(base + Duration::from_secs(9)).await;
        t.handle_pulse(bytes("a"), Instant::now()).await.unwrap();
        tokio::time::sleep_until(base + Duration::from_secs(10)).await;
        t.handle_pulse(bytes("v"), Instant::now()).await.unwrap();
        assert_eq!(t.phase(), Phase::Running);
        assert_eq!(t.interval(), Some(1.0));

        tokio::time::sleep_until(base + Duration::from_secs(12)).await;
        assert_times(&times(&seen), &[10.0, 10.25, 10.5, 10.75]);
        assert!(seen.lock().unwrap().iter().all(|(v, _)| v == "v"));
        assert_eq!(bus.get("x4.clock").as_deref(), Some(&b"v"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn pass_through_publishes_once_per_pulse() {
        let bus = MemoryBus::default();
        let base = Instant::now();
        let seen = record_outputs(&bus, "x1.clock", base);
        let mut t = task(&bus, 1, 1.0);

        for (i, secs) in [0.0, 0.5, 1.0, 1.5].into_iter().enumerate() {
            tokio::time::sleep_until(base + Duration::from_secs_f64(secs)).await;
            t.handle_pulse(bytes(&i.to_string()), Instant::now()).await.unwrap();
            assert!(t.timers.is_empty());
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let values: Vec<String> = seen.lock().unwrap().iter().map(|(v, _)| v.clone()).collect();
        assert_eq!(values, vec!["1", "2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_retrigger_cancels_stale_subdivisions() {
        let bus = MemoryBus::default();
        let base = Instant::now();
        let seen = record_outputs(&bus, "x4.clock", base);
        let t = task(&bus, 4, 1.0);
        let mut events = t.events.subscribe();
        let sub = bus.subscribe(&t.channels()).await.unwrap();
        let flag = t.run_flag();
        let handle = tokio::spawn(t.run(sub));

        pulse_at(&bus, base, 9.0, "a").await;
        pulse_at(&bus, base, 10.0, "b").await;
        pulse_at(&bus, base, 10.1, "c").await;
        tokio::time::sleep_until(base + Duration::from_secs(12)).await;

        let got = seen.lock().unwrap().clone();
        let values: Vec<&str> = got.iter().map(|(v, _)| v.as_str()).collect();
        assert_eq!(values, vec!["b", "c", "c", "c", "c"]);
        assert_times(&times(&seen), &[10.0, 10.1, 10.125, 10.15, 10.175]);

        flag.stop();
        bus.publish(CONTROL, b"1").await.unwrap();
        assert!(handle.await.unwrap().is_ok());

        let mut cancelled = None;
        while let Ok(ev) = events.try_recv() {
            if ev.kind == EventKind::TimersCancelled {
                cancelled = ev.count;
            }
        }
        assert_eq!(cancelled, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drops_pending_subdivisions() {
        let bus = MemoryBus::default();
        let base = Instant::now();
        let seen = record_outputs(&bus, "x2.clock", base);
        let t = task(&bus, 2, 1.0);
        let sub = bus.subscribe(&t.channels()).await.unwrap();
        let flag = t.run_flag();
        let handle = tokio::spawn(t.run(sub));

        pulse_at(&bus, base, 0.0, "a").await;
        pulse_at(&bus, base, 4.0, "b").await;
        tokio::time::sleep_until(base + Duration::from_secs(5)).await;

        flag.stop();
        bus.publish(CONTROL, b"1").await.unwrap();
        assert!(handle.await.unwrap().is_ok());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_times(&times(&seen), &[4.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn control_message_without_stop_is_ignored() {
        let bus = MemoryBus::default();
        let t = task(&bus, 2, 1.0);
        let sub = bus.subscribe(&t.channels()).await.unwrap();
        let handle = tokio::spawn(t.run(sub));

        bus.publish(CONTROL, b"1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        bus.close();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_stops_task() {
        let bus = Arc::new(FlakyBus::new());
        let base = Instant::now();
        let spec = MultiplierSpec::new("clock", 2, 1.0).unwrap();
        let t = MultiplierTask::new(
            spec,
            CONTROL,
            bus.clone(),
            EventBus::new(64),
            PulseCounter::default(),
        );
        let mut events = t.events.subscribe();
        let sub = bus.subscribe(&t.channels()).await.unwrap();
        let handle = tokio::spawn(t.run(sub));

        pulse_at(&bus.inner, base, 0.0, "a").await;
        pulse_at(&bus.inner, base, 1.0, "b").await;
        // the subdivision due at 1.5s fails
        tokio::time::sleep_until(base + Duration::from_millis(1200)).await;
        bus.break_publishes();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.task(), "x2.clock");
        assert_eq!(err.as_label(), "task_bus");
        assert!(Instant::now() >= base + Duration::from_millis(1500));

        let mut last = None;
        while let Ok(ev) = events.try_recv() {
            last = Some(ev.kind);
        }
        assert_eq!(last, Some(EventKind::TaskFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn binary_payload_is_replayed_unchanged() {
        let bus = MemoryBus::default();
        let raw: [u8; 3] = [0xff, 0x00, 0xc3];
        let t = task(&bus, 2, 1.0);
        let mut out = bus.subscribe_local(&["x2.clock".to_string()]);
        let sub = bus.subscribe(&t.channels()).await.unwrap();
        let handle = tokio::spawn(t.run(sub));

        bus.publish("clock", &raw).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        bus.publish("clock", &raw).await.unwrap();

        for _ in 0..2 {
            let msg = out.recv().await.unwrap().unwrap();
            assert_eq!(&*msg.payload, &raw[..]);
        }
        assert!(!handle.is_finished());
        bus.close();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_after_stop_flag_is_not_published() {
        let bus = MemoryBus::default();
        let base = Instant::now();
        let seen = record_outputs(&bus, "x2.clock", base);
        let pulses = PulseCounter::default();
        let spec = MultiplierSpec::new("clock", 2, 1.0).unwrap();
        let t = MultiplierTask::new(
            spec,
            CONTROL,
            Arc::new(bus.clone()),
            EventBus::new(64),
            pulses.clone(),
        );
        let sub = bus.subscribe(&t.channels()).await.unwrap();
        let flag = t.run_flag();
        let handle = tokio::spawn(t.run(sub));

        pulse_at(&bus, base, 0.0, "a").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pulses.get(), 1);

        // the stop flag is cleared before a real pulse, with no control broadcast
        flag.stop();
        pulse_at(&bus, base, 1.0, "b").await;
        assert!(handle.await.unwrap().is_ok());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.get("x2.clock"), None);
        assert_eq!(pulses.get(), 1);
    }
}
