//! Timer primitives for the coordinator
//!
//! Three shapes cover every timer in the integration:
//!
//! - [`DelayTimer`]: single-shot delayed action (window off-delay, restore
//!   delay, window timeout). Arming replaces any pending run.
//! - [`TimerCore`]: shared countdown state for the per-second timer loops
//!   (turn-on timer, cyclic turn-off timer). A [`TimerGuard`] carries the arm
//!   generation; loops check it after every suspension point, so a timer
//!   stopped mid-action never applies or notifies afterwards, and no two
//!   countdown loops for the same timer identity can coexist.
//! - [`OnCounter`]: pausable elapsed-seconds counter backing the turn-on
//!   notification.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Single-shot cancellable delay. Starting replaces (cancels) any pending run.
pub struct DelayTimer {
    name: &'static str,
    inner: Mutex<Option<Armed>>,
}

struct Armed {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DelayTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(None),
        }
    }

    /// Arm the timer: after `delay`, run `action` unless cancelled.
    pub fn start<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.inner.lock().unwrap();
        if let Some(previous) = slot.take() {
            if !previous.handle.is_finished() {
                warn!(timer = self.name, "Replacing pending timer");
            }
            previous.cancelled.store(true, Ordering::SeqCst);
            previous.handle.abort();
        }

        debug!(timer = self.name, ?delay, "Timer armed");
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            // Checked after the suspension point: a concurrent cancel wins.
            if !flag.load(Ordering::SeqCst) {
                action.await;
            }
        });
        *slot = Some(Armed { cancelled, handle });
    }

    /// Cancel a pending run. Returns whether one was actually pending.
    pub fn cancel(&self) -> bool {
        let mut slot = self.inner.lock().unwrap();
        match slot.take() {
            Some(armed) => {
                let was_pending = !armed.handle.is_finished();
                armed.cancelled.store(true, Ordering::SeqCst);
                armed.handle.abort();
                if was_pending {
                    debug!(timer = self.name, "Timer cancelled");
                }
                was_pending
            }
            None => false,
        }
    }

    /// Whether a run is still pending.
    pub fn is_armed(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .map(|armed| !armed.handle.is_finished() && !armed.cancelled.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// Shared state of a per-second countdown timer.
pub struct TimerCore {
    name: &'static str,
    shared: Arc<TimerShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct TimerShared {
    running: AtomicBool,
    generation: AtomicU64,
    total_secs: AtomicU64,
    remaining_secs: AtomicU64,
}

impl TimerCore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            shared: Arc::new(TimerShared {
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                total_secs: AtomicU64::new(0),
                remaining_secs: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Arm the countdown, stopping any previous run first. The returned guard
    /// is only valid until the next arm or disarm.
    pub fn arm(&self, total: Duration) -> TimerGuard {
        let mut task = self.task.lock().unwrap();
        if self.shared.running.swap(false, Ordering::SeqCst) {
            warn!(timer = self.name, "Timer already running, stopping previous run");
        }
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let secs = total.as_secs();
        self.shared.total_secs.store(secs, Ordering::SeqCst);
        self.shared.remaining_secs.store(secs, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);
        debug!(timer = self.name, secs, "Countdown armed");

        TimerGuard {
            shared: self.shared.clone(),
            generation,
        }
    }

    /// Attach the countdown task so the next arm/disarm can abort it.
    pub fn attach(&self, handle: JoinHandle<()>) {
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Stop the countdown. Returns whether it was running.
    pub fn disarm(&self) -> bool {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        self.shared.remaining_secs.store(0, Ordering::SeqCst);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        if was_running {
            debug!(timer = self.name, "Countdown disarmed");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn remaining_secs(&self) -> u64 {
        self.shared.remaining_secs.load(Ordering::SeqCst)
    }
}

/// Liveness token scoped to one arm generation of a [`TimerCore`].
pub struct TimerGuard {
    shared: Arc<TimerShared>,
    generation: u64,
}

impl TimerGuard {
    /// Whether this run is still the live one.
    pub fn live(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
            && self.shared.generation.load(Ordering::SeqCst) == self.generation
    }

    pub fn remaining_secs(&self) -> u64 {
        self.shared.remaining_secs.load(Ordering::SeqCst)
    }

    /// Decrement the countdown by one second.
    pub fn tick(&self) -> u64 {
        let remaining = self.shared.remaining_secs.load(Ordering::SeqCst);
        let next = remaining.saturating_sub(1);
        self.shared.remaining_secs.store(next, Ordering::SeqCst);
        next
    }

    /// Restart the countdown from its total (cyclic timers).
    pub fn reset(&self) {
        self.shared
            .remaining_secs
            .store(self.shared.total_secs.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    /// Mark this run finished without invalidating the core for a new arm.
    pub fn finish(&self) {
        if self.shared.generation.load(Ordering::SeqCst) == self.generation {
            self.shared.running.store(false, Ordering::SeqCst);
        }
    }
}

/// Pausable elapsed-time counter for the turn-on notification.
///
/// Elapsed time is monotone non-decreasing while unpaused and frozen while
/// paused; pause and resume are idempotent. Only a definitive stop resets it.
pub struct OnCounter {
    running: AtomicBool,
    paused: AtomicBool,
    elapsed_secs: AtomicU64,
    notified: AtomicBool,
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OnCounter {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            elapsed_secs: AtomicU64::new(0),
            notified: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Begin a new on-episode. Returns `None` when the counter is already
    /// running (the accumulated time must be kept).
    pub fn begin(&self) -> Option<CounterGuard> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.paused.store(false, Ordering::SeqCst);
        self.elapsed_secs.store(0, Ordering::SeqCst);
        self.notified.store(false, Ordering::SeqCst);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Some(CounterGuard { generation })
    }

    pub fn attach(&self, handle: JoinHandle<()>) {
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Definitive stop: reset elapsed time and cancel the tick task.
    pub fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.elapsed_secs.store(0, Ordering::SeqCst);
        self.notified.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        was_running
    }

    /// Freeze the counter. A no-op when not running or already paused.
    /// Returns whether the call actually paused it.
    pub fn pause(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let paused_now = !self.paused.swap(true, Ordering::SeqCst);
        if paused_now {
            debug!(elapsed = self.elapsed(), "Turn-on counter paused");
        }
        paused_now
    }

    /// Unfreeze the counter. A no-op when not running or not paused.
    /// Returns whether the call actually resumed it.
    pub fn resume(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let resumed_now = self.paused.swap(false, Ordering::SeqCst);
        if resumed_now {
            debug!(elapsed = self.elapsed(), "Turn-on counter resumed");
        }
        resumed_now
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed_secs.load(Ordering::SeqCst)
    }

    /// Advance one second when unpaused; returns the new elapsed value.
    pub fn advance(&self, guard: &CounterGuard) -> Option<u64> {
        if !self.guard_live(guard) || self.paused.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.elapsed_secs.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The notification fires exactly once per episode.
    pub fn try_mark_notified(&self, guard: &CounterGuard) -> bool {
        self.guard_live(guard) && !self.notified.swap(true, Ordering::SeqCst)
    }

    pub fn guard_live(&self, guard: &CounterGuard) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.generation.load(Ordering::SeqCst) == guard.generation
    }
}

impl Default for OnCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Token for one on-episode of the [`OnCounter`].
pub struct CounterGuard {
    generation: u64,
}
