//! Cancellable scheduled tasks and the turn countdown.
//!
//! Each [`ScheduledTask`] is one tokio task; cancelling aborts it. Dropping
//! the handle does not cancel: scheduled work lives for the session unless
//! someone explicitly stops it.
//!
//! # Usage
//!
//! ```ignore
//! // Poll every three seconds until cancelled.
//! let poll = ScheduledTask::repeating(Duration::from_secs(3), || fetch());
//! poll.cancel();
//!
//! // Count a turn down, one tick per second.
//! let countdown = Countdown::new(|remaining| println!("{remaining} seconds remaining..."));
//! countdown.reset(10);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Handle to a delayed or repeating callback.
#[derive(Debug)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `f` once after `delay`.
    pub fn once<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let deadline = tokio::time::Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if !flag.swap(true, Ordering::SeqCst) {
                f();
            }
        });
        Self { cancelled, handle }
    }

    /// Run `f` every `interval`, first after one interval, until cancelled.
    pub fn repeating<F>(interval: Duration, mut f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::repeating_while(interval, move || {
            f();
            true
        })
    }

    /// Like [`Self::repeating`], but `f` returns `false` to end the task.
    pub fn repeating_while<F>(interval: Duration, mut f: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let start = tokio::time::Instant::now() + interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) || !f() {
                    break;
                }
            }
        });
        Self { cancelled, handle }
    }

    /// Stop the task. Safe to call any number of times.
    ///
    /// Returns `true` only for the call that actually cancelled it.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::SeqCst);
        self.handle.abort();
        if first {
            log::trace!("[Timer] Task cancelled");
        }
        first
    }

    /// Whether the task was cancelled or a one-shot task already ran.
    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.handle.is_finished()
    }
}

/// Per-second countdown reporting remaining seconds to a callback.
///
/// `reset(n)` reports `n` immediately, then `n - 1`, ... down to `0` one
/// second apart, and stops itself at zero. `on_tick` runs under the
/// countdown's lock: a `stop()` from another thread waits for a tick in
/// flight, and `on_tick` must not call back into the countdown.
pub struct Countdown {
    on_tick: Arc<dyn Fn(u64) + Send + Sync>,
    state: Arc<Mutex<CountState>>,
    task: Mutex<Option<ScheduledTask>>,
}

#[derive(Debug, Default)]
struct CountState {
    remaining: u64,
    /// Bumped on every start/stop; ticks from an older generation are void.
    generation: u64,
}

impl std::fmt::Debug for Countdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Countdown")
            .field("remaining", &self.remaining())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Countdown {
    /// Create a stopped countdown.
    pub fn new<F>(on_tick: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        Self {
            on_tick: Arc::new(on_tick),
            state: Arc::new(Mutex::new(CountState::default())),
            task: Mutex::new(None),
        }
    }

    /// Stop any running count and start again from `seconds`.
    pub fn reset(&self, seconds: u64) {
        self.stop();
        self.start(seconds);
    }

    fn start(&self, seconds: u64) {
        let generation = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.remaining = seconds;
            (self.on_tick)(seconds);
            state.generation
        };
        if seconds == 0 {
            return;
        }

        let state = Arc::clone(&self.state);
        let on_tick = Arc::clone(&self.on_tick);
        let task = ScheduledTask::repeating_while(Duration::from_secs(1), move || {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.generation != generation {
                return false;
            }
            state.remaining = state.remaining.saturating_sub(1);
            on_tick(state.remaining);
            state.remaining > 0
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Stop ticking. Idempotent; no tick is delivered after this returns.
    pub fn stop(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation += 1;
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.cancel();
        }
    }

    /// Seconds left as of the last tick.
    pub fn remaining(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remaining
    }

    /// Whether a count is in progress.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_done())
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
    }
}
