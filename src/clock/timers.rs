//! # Cancellable timer set.
//!
//! A [`TimerSet`] owns the delayed actions scheduled for the current
//! inter-pulse period. Each action runs on its own tokio task once its deadline
//! passes; [`TimerSet::cancel_all`] drops every action that has not started yet.
//!
//! ## Start/cancel race
//! Every timer carries a small state word:
//!
//! ```text
//!            timer task wins                 action done
//! PENDING ───────────────────► STARTED ───────────────────► DONE
//!    │
//!    └────────────────────────► CANCELLED
//!            cancel() wins
//! ```
//!
//! The timer task and `cancel()` both try a compare-exchange out of `PENDING`;
//! exactly one of them succeeds. Once `cancel_all()` returns, every timer that
//! was in the set is either `CANCELLED` (its action never runs) or was already
//! `STARTED` (its action is allowed to finish).

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

/// Deadline used when `now + delay` overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `base + delay`, or a deadline decades away if that overflows the clock.
pub(crate) fn deadline_after(base: Instant, delay: Duration) -> Instant {
    base.checked_add(delay)
        .unwrap_or_else(|| base + FAR_FUTURE)
}

/// Handle to one scheduled action.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    id: u64,
    state: Arc<AtomicU8>,
    wake: CancellationToken,
}

impl TimerHandle {
    /// Identifier, unique within its [`TimerSet`].
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Prevents the action from starting.
    ///
    /// Returns `true` if this call cancelled it, `false` if it had already
    /// started, finished, or been cancelled.
    pub fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.wake.cancel();
        won
    }

    /// `true` while the action has neither started nor been cancelled.
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// `true` once the action ran to completion.
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }
}

struct Entry {
    handle: TimerHandle,
    join: JoinHandle<()>,
}

/// Group of delayed actions that can be cancelled together.
///
/// Owned by a single task; the actions themselves run concurrently with it.
#[derive(Default)]
pub struct TimerSet {
    entries: Vec<Entry>,
    next_id: u64,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action` after `delay`, on its own tokio task.
    pub fn schedule<F>(&mut self, delay: Duration, action: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule_at(deadline_after(Instant::now(), delay), action)
    }

    /// Runs `action` at `deadline`, on its own tokio task.
    ///
    /// A deadline in the past fires on the next scheduler turn. Finished entries
    /// stay in the set until [`cancel_all`](Self::cancel_all) or
    /// [`shutdown`](Self::shutdown) drains it, once per period.
    pub fn schedule_at<F>(&mut self, deadline: Instant, action: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = TimerHandle {
            id: self.next_id,
            state: Arc::new(AtomicU8::new(PENDING)),
            wake: CancellationToken::new(),
        };
        self.next_id += 1;

        let state = Arc::clone(&handle.state);
        let wake = handle.wake.clone();
        let join = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = wake.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            if state
                .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                action.await;
                state.store(DONE, Ordering::Release);
            }
        });

        self.entries.push(Entry {
            handle: handle.clone(),
            join,
        });
        handle
    }

    /// Cancels every action that has not started yet and empties the set.
    ///
    /// Returns how many actions were prevented from running. Actions already
    /// running keep going; use [`shutdown`](Self::shutdown) to wait for them.
    pub fn cancel_all(&mut self) -> usize {
        self.entries
            .drain(..)
            .filter(|e| e.handle.cancel())
            .count()
    }

    /// Cancels all pending actions and waits until running ones have finished.
    pub async fn shutdown(&mut self) -> usize {
        let entries: Vec<Entry> = self.entries.drain(..).collect();
        let cancelled = entries.iter().filter(|e| e.handle.cancel()).count();
        for entry in entries {
            let _ = entry.join.await;
        }
        cancelled
    }

    /// Number of actions that have neither started nor been cancelled.
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|e| e.handle.is_pending()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        for entry in &self.entries {
            entry.handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Mutex;

    type Action = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Action) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let make = move |n: u32| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(n);
            }) as Action
        };
        (fired, make)
    }

    #[tokio::test(start_paused = true)]
    async fn actions_fire_in_deadline_order() {
        let (fired, make) = recorder();
        let mut set = TimerSet::new();
        set.schedule(Duration::from_millis(30), make(3));
        set.schedule(Duration::from_millis(10), make(1));
        set.schedule(Duration::from_millis(20), make(2));
        assert_eq!(set.pending(), 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(set.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_pending_actions() {
        let (fired, make) = recorder();
        let mut set = TimerSet::new();
        let early = set.schedule(Duration::from_millis(10), make(1));
        let late = set.schedule(Duration::from_millis(100), make(2));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(early.is_done());

        assert_eq!(set.cancel_all(), 1);
        assert!(set.is_empty());
        assert!(late.is_cancelled());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn set_is_reusable_after_cancel() {
        let (fired, make) = recorder();
        let mut set = TimerSet::new();
        set.schedule(Duration::from_millis(10), make(1));
        set.cancel_all();
        set.schedule(Duration::from_millis(10), make(2));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*fired.lock().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn started_action_finishes_and_shutdown_waits_for_it() {
        let finished = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&finished);
        let mut set = TimerSet::new();
        let handle = set.schedule(Duration::from_millis(10), async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            *flag.lock().unwrap() = true;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.cancel(), "already running");
        assert_eq!(set.shutdown().await, 0);
        assert!(*finished.lock().unwrap());
        assert!(handle.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_fires_without_waiting() {
        let (fired, make) = recorder();
        let mut set = TimerSet::new();
        set.schedule(Duration::ZERO, make(7));
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*fired.lock().unwrap(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_ids_are_unique() {
        let (_fired, make) = recorder();
        let mut set = TimerSet::new();
        let a = set.schedule(Duration::from_secs(1), make(1));
        let b = set.schedule(Duration::from_secs(1), make(2));
        assert_ne!(a.id(), b.id());
        drop(set);
        assert!(a.is_cancelled() && b.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_entries_wait_for_cancel_all() {
        let (fired, make) = recorder();
        let mut set = TimerSet::new();
        let early: Vec<TimerHandle> = (0..64)
            .map(|n| set.schedule(Duration::from_millis(1), make(n)))
            .collect();
        let late = set.schedule(Duration::from_secs(10), make(99));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(fired.lock().unwrap().len(), 64);
        assert!(early.iter().all(TimerHandle::is_done));
        assert_eq!(set.pending(), 1);
        assert!(!set.is_empty());

        assert_eq!(set.cancel_all(), 1);
        assert!(set.is_empty());
        assert!(late.is_cancelled());
    }
}
