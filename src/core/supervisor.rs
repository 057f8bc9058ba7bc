//! # Supervisor: runs every multiplier task and stops them together.
//!
//! The [`Supervisor`] owns the bus handle, the lifecycle [`EventBus`], the
//! subscriber list and the global [`Config`]. It spawns one
//! [`MultiplierTask`] per `(channel, multiplier)` pair and implements the
//! broadcast stop protocol.
//!
//! ## Key responsibilities
//! - subscribe every task **before** spawning it, so no pulse published after
//!   [`start`](Supervisor::start) returns can be missed
//! - forward lifecycle events to the [`AliveTracker`] and fan them out via [`SubscriberSet`]
//! - log the diagnostic pulse count when [`Config::report_interval`] is set
//! - stop every task with one control broadcast and wait up to [`Config::grace`]
//!
//! ## High-level architecture
//! ```text
//! start():
//!   MultiplierSpec[0]  MultiplierSpec[1]  ...  MultiplierSpec[N-1]
//!         │                  │                        │
//!         └──► MultiplierTask::new(spec, control, bus, events, pulses)
//!                  └──► bus.subscribe([channel, control])     (all first)
//!                  └──► tasks.spawn(task.run(subscription))   (then spawn)
//!
//! Event flow:
//!   MultiplierTask ── publish(Event) ──► EventBus ──► listener ──► AliveTracker::update
//!                                                         └──────► SubscriberSet::emit
//!
//! stop_all():
//!   publish(ShutdownRequested)
//!   └─► RunFlag::stop() on every task
//!   └─► bus.publish(control_channel, b"1")     (wakes every blocked receive)
//!   └─► wait_all_with_grace(cfg.grace):
//!          ├─ all joined        → AllStoppedWithin
//!          └─ timeout exceeded  → GraceExceeded, abort the rest
//!                                 (AliveTracker::snapshot() names stuck tasks)
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use pulsevisor::{Config, MemoryBus, SupervisorBuilder};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = MemoryBus::default();
//!     let mut sup = SupervisorBuilder::new(Config::default(), Arc::new(bus.clone()))
//!         .with_channels(["clock"])
//!         .with_multipliers([2, 4])
//!         .build()?;
//!
//!     assert_eq!(sup.keys(), vec!["x2.clock", "x4.clock"]);
//!     sup.start().await?;
//!     sup.stop_all().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::bus::BusRef;
use crate::clock::{MultiplierSpec, MultiplierTask, RunFlag};
use crate::core::{AliveTracker, Config, PulseCounter, shutdown};
use crate::error::{RuntimeError, TaskError};
use crate::events::{Event, EventBus, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Payload of the control broadcast. Tasks ignore its value.
const UNBLOCK: &[u8] = b"1";

/// Output key and outcome of one finished task.
type TaskExit = (Arc<str>, Result<(), TaskError>);

/// Handles that only exist between `start()` and `stop_all()`.
struct Running {
    tasks: JoinSet<TaskExit>,
    flags: Vec<RunFlag>,
    background: CancellationToken,
    listener: JoinHandle<()>,
    reporter: Option<JoinHandle<()>>,
}

/// Coordinates multiplier tasks, event delivery and the broadcast stop protocol.
///
/// Built by [`SupervisorBuilder`](crate::SupervisorBuilder).
pub struct Supervisor {
    cfg: Config,
    bus: BusRef,
    events: EventBus,
    specs: Vec<MultiplierSpec>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    alive: Arc<AliveTracker>,
    pulses: PulseCounter,
    running: Option<Running>,
}

impl Supervisor {
    pub(crate) fn new_internal(
        cfg: Config,
        bus: BusRef,
        specs: Vec<MultiplierSpec>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        let events = EventBus::new(cfg.event_capacity_clamped());
        Self {
            cfg,
            bus,
            events,
            specs,
            subscribers,
            alive: Arc::new(AliveTracker::new()),
            pulses: PulseCounter::default(),
            running: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Task specs, one per distinct `(channel, multiplier)` pair, in configuration order.
    pub fn specs(&self) -> &[MultiplierSpec] {
        &self.specs
    }

    /// Output keys of every task, in configuration order.
    pub fn keys(&self) -> Vec<String> {
        self.specs.iter().map(MultiplierSpec::output_key).collect()
    }

    /// Lifecycle event channel; subscribe before [`start`](Self::start) to see every event.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Real pulses observed so far by all tasks together.
    pub fn pulse_count(&self) -> u64 {
        self.pulses.get()
    }

    /// `true` between [`start`](Self::start) and [`stop_all`](Self::stop_all).
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Output keys of the tasks currently alive, sorted.
    pub async fn alive(&self) -> Vec<String> {
        self.alive.snapshot().await
    }

    /// Starts every task, then waits for a termination signal or the first
    /// task exit and runs [`stop_all`](Self::stop_all).
    ///
    /// A task failure takes precedence over the outcome of the stop protocol.
    pub async fn run(&mut self) -> Result<(), RuntimeError> {
        self.start().await?;
        let failure = self.wait_for_stop_request().await;
        let stopped = self.stop_all().await;
        match failure {
            Some(err) => Err(err.into()),
            None => stopped,
        }
    }

    /// Subscribes and spawns every task. Calling it while running is a no-op.
    ///
    /// Fails without spawning anything if one of the subscriptions fails.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        if self.running.is_some() {
            return Ok(());
        }

        let mut prepared = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let task = MultiplierTask::new(
                spec.clone(),
                self.cfg.control_channel.as_str(),
                Arc::clone(&self.bus),
                self.events.clone(),
                self.pulses.clone(),
            );
            let subscription = self.bus.subscribe(&task.channels()).await?;
            tracing::info!(
                key = task.key(),
                channel = spec.channel(),
                multiplier = spec.multiplier(),
                "output key"
            );
            prepared.push((task, subscription));
        }

        let background = CancellationToken::new();
        let listener = self.spawn_listener(background.clone());
        let reporter = self
            .cfg
            .report_every()
            .map(|every| self.spawn_reporter(every, background.clone()));

        let mut tasks = JoinSet::new();
        let mut flags = Vec::with_capacity(prepared.len());
        for (task, subscription) in prepared {
            let key: Arc<str> = task.key().into();
            flags.push(task.run_flag());
            tasks.spawn(async move {
                let res = std::panic::AssertUnwindSafe(task.run(subscription))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic_err| {
                        Err(TaskError::Join {
                            task: key.to_string(),
                            reason: panic_message(&*panic_err),
                        })
                    });
                (key, res)
            });
        }

        self.running = Some(Running {
            tasks,
            flags,
            background,
            listener,
            reporter,
        });
        Ok(())
    }

    /// Stops every task and waits until all of them reached their stopped state.
    ///
    /// 1. clears every task's `running` flag;
    /// 2. publishes one message on the control channel, waking every blocked receive;
    /// 3. waits up to [`Config::grace`] for all tasks to finish.
    ///
    /// Returns the first task error seen while draining, or
    /// [`RuntimeError::GraceExceeded`] if some tasks had to be aborted.
    /// Calling it when nothing runs is a no-op.
    pub async fn stop_all(&mut self) -> Result<(), RuntimeError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        self.events.publish(Event::new(EventKind::ShutdownRequested));
        for flag in &running.flags {
            flag.stop();
        }
        if let Err(err) = self.bus.publish(&self.cfg.control_channel, UNBLOCK).await {
            tracing::warn!(err = %err, label = err.as_label(), "control broadcast failed");
        }

        let res = self.wait_all_with_grace(&mut running.tasks).await;

        running.background.cancel();
        if let Some(reporter) = running.reporter {
            let _ = reporter.await;
        }
        let _ = running.listener.await;
        res
    }

    /// Waits for all tasks to finish within the configured grace period.
    ///
    /// Publishes [`EventKind::AllStoppedWithin`] on success, or
    /// [`EventKind::GraceExceeded`] on timeout, in which case the remaining
    /// tasks are aborted.
    async fn wait_all_with_grace(&self, tasks: &mut JoinSet<TaskExit>) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let mut first_error: Option<TaskError> = None;
        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                if let (_, Err(err)) = task_exit(joined) {
                    first_error.get_or_insert(err);
                }
            }
        };
        let timed = tokio::time::timeout(grace, drain).await;

        match timed {
            Ok(()) => {
                self.events.publish(Event::new(EventKind::AllStoppedWithin));
                match first_error {
                    Some(err) => Err(err.into()),
                    None => Ok(()),
                }
            }
            Err(_) => {
                let stuck = self.alive.snapshot().await;
                self.events.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_reason(format!("stuck: {}", stuck.join(", "))),
                );
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    /// Resolves on a termination signal (`None`) or when a task exits on its own.
    async fn wait_for_stop_request(&mut self) -> Option<TaskError> {
        let running = self.running.as_mut()?;
        tokio::select! {
            _ = shutdown_signal() => None,
            joined = running.tasks.join_next() => {
                let (key, res) = task_exit(joined?);
                match res {
                    Ok(()) => {
                        tracing::info!(task = %key, "task exited on its own, stopping all");
                        None
                    }
                    Err(err) => Some(err),
                }
            }
        }
    }

    /// Subscribes to the event bus and forwards events until `token` is cancelled.
    ///
    /// Already queued events are still delivered after cancellation, then the
    /// subscriber workers are drained.
    fn spawn_listener(&self, token: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.events.subscribe();
        let set = SubscriberSet::new(self.subscribers.clone(), self.events.clone());
        let alive = Arc::clone(&self.alive);
        tracing::debug!(subscribers = set.len(), "event listener started");

        tokio::spawn(async move {
            loop {
                let ev = tokio::select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => ev,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "event listener lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = token.cancelled() => break,
                };
                alive.update(&ev).await;
                set.emit(&ev);
            }
            loop {
                match rx.try_recv() {
                    Ok(ev) => {
                        alive.update(&ev).await;
                        set.emit(&ev);
                    }
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            set.shutdown().await;
        })
    }

    /// Logs the pulse count every `every` until `token` is cancelled.
    fn spawn_reporter(&self, every: Duration, token: CancellationToken) -> JoinHandle<()> {
        let pulses = self.pulses.clone();
        let multipliers = self
            .specs
            .iter()
            .map(MultiplierSpec::multiplier)
            .collect::<HashSet<_>>()
            .len()
            .max(1);

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        let count = pulses.get();
                        tracing::info!(
                            pulses = count,
                            per_multiplier = count as f64 / multipliers as f64,
                            "pulse count"
                        );
                    }
                }
            }
        })
    }
}

/// Logs the received signal; parks forever if handlers cannot be installed.
async fn shutdown_signal() {
    match shutdown::wait_for_shutdown_signal().await {
        Ok(signal) => tracing::info!(signal, "shutdown signal received"),
        Err(err) => {
            tracing::error!(err = %err, "cannot install signal handlers");
            std::future::pending::<()>().await;
        }
    }
}

fn task_exit(joined: Result<TaskExit, JoinError>) -> TaskExit {
    joined.unwrap_or_else(|err| {
        (
            Arc::from("unknown"),
            Err(TaskError::Join {
                task: "unknown".into(),
                reason: err.to_string(),
            }),
        )
    })
}

fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
