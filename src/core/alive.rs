//! # Task liveness tracker with sequence-based ordering.
//!
//! Maintains which multiplier tasks are currently running, using event
//! sequence numbers to reject out-of-order delivery.
//!
//! ```text
//! MultiplierTask ──► EventBus ──► event listener ──► AliveTracker::update()
//!                                                          │
//!                                                          ▼
//!                                               HashMap<key, TaskState>
//! ```
//!
//! ## Rules
//! - `TaskStarting` marks a task alive; `TaskStopped` / `TaskFailed` mark it stopped
//! - Other events only advance the task's last seen `seq`
//! - Events with `seq <= last_seq` are rejected (stale)

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::events::{Event, EventKind};

#[derive(Debug, Clone)]
struct TaskState {
    last_seq: u64,
    alive: bool,
}

/// Thread-safe tracker of alive tasks, used to name stuck tasks on shutdown.
#[derive(Default)]
pub struct AliveTracker {
    state: RwLock<HashMap<String, TaskState>>,
}

impl AliveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `ev` if it is newer than the last event seen for its task.
    ///
    /// Returns `true` if the alive state changed.
    pub async fn update(&self, ev: &Event) -> bool {
        let Some(name) = ev.task.as_deref() else {
            return false;
        };
        if !is_task_event(ev.kind) {
            return false;
        }

        let mut state = self.state.write().await;
        let entry = state.entry(name.to_string()).or_insert(TaskState {
            last_seq: 0,
            alive: false,
        });
        if entry.last_seq != 0 && ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;

        let alive = match ev.kind {
            EventKind::TaskStarting => true,
            EventKind::TaskStopped | EventKind::TaskFailed => false,
            _ => return false,
        };
        let changed = entry.alive != alive;
        entry.alive = alive;
        changed
    }

    /// Returns the sorted keys of tasks that started and have not stopped.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut alive: Vec<String> = state
            .iter()
            .filter(|(_, ts)| ts.alive)
            .map(|(name, _)| name.clone())
            .collect();
        alive.sort_unstable();
        alive
    }

    pub async fn is_alive(&self, name: &str) -> bool {
        self.state
            .read()
            .await
            .get(name)
            .map(|ts| ts.alive)
            .unwrap_or(false)
    }
}

/// Events emitted by multiplier tasks (subscriber events reuse `task` for the subscriber name).
fn is_task_event(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::TaskStarting
            | EventKind::TaskStopped
            | EventKind::TaskFailed
            | EventKind::PulseSwallowed
            | EventKind::PulseMultiplied
            | EventKind::TimersCancelled
    )
}
