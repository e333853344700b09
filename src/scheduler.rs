//! Clock and one-shot timer abstraction
//!
//! Timers are scheduled at an absolute Unix-millisecond deadline so a
//! restarted process (or a test driving a [`ManualClock`]) can compute the
//! remaining delay from persisted state alone.
//!
//! - [`TokioScheduler`]: production timers backed by tokio tasks
//! - [`ManualScheduler`]: timers fired explicitly by advancing a [`ManualClock`]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Source of the current time in Unix milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Identifier of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// Work to run when a timer fires
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot timer service
pub trait Scheduler: Send + Sync {
    /// Run `callback` once at `at_millis` (immediately if already past)
    fn schedule_at(&self, at_millis: u64, callback: TimerCallback) -> TimerId;

    /// Cancel a timer
    ///
    /// Returns false if the timer already fired or was cancelled; that is
    /// not an error.
    fn cancel(&self, id: TimerId) -> bool;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Tokio scheduler
// ============================================================================

/// Timers backed by tokio tasks sleeping until their deadline
pub struct TokioScheduler {
    clock: Arc<dyn Clock>,
    runtime: Option<Handle>,
    /// Live timers; the abort handle is filled in once the task is spawned
    timers: Arc<Mutex<HashMap<TimerId, Option<AbortHandle>>>>,
    next_id: AtomicU64,
}

impl TokioScheduler {
    /// Create a scheduler on the current tokio runtime, if any
    ///
    /// Without one, timers are spawned on whichever runtime is current when
    /// they are scheduled.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            runtime: Handle::try_current().ok(),
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a scheduler on an explicit runtime
    pub fn with_runtime(clock: Arc<dyn Clock>, runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
            ..Self::new(clock)
        }
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn pending(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_at(&self, at_millis: u64, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            tracing::warn!(timer = id.0, at = at_millis, "No tokio runtime, timer will not fire");
            return id;
        };

        let delay = Duration::from_millis(at_millis.saturating_sub(self.clock.now_millis()));
        lock(&self.timers).insert(id, None);

        let timers = self.timers.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let live = lock(&timers).remove(&id).is_some();
            if live {
                callback();
            }
        });

        if let Some(slot) = lock(&self.timers).get_mut(&id) {
            *slot = Some(task.abort_handle());
        }

        tracing::debug!(timer = id.0, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        match lock(&self.timers).remove(&id) {
            Some(handle) => {
                if let Some(handle) = handle {
                    handle.abort();
                }
                tracing::debug!(timer = id.0, "Timer cancelled");
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Manual scheduler
// ============================================================================

/// Timers that fire only when the paired [`ManualClock`] is advanced
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    timers: Mutex<BTreeMap<(u64, TimerId), TimerCallback>>,
    next_id: AtomicU64,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            timers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Advance the clock and fire every timer that became due
    ///
    /// Returns the number of callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        self.clock.advance(by);
        self.run_due()
    }

    /// Fire every timer due at the current clock time, in deadline order
    pub fn run_due(&self) -> usize {
        let now = self.clock.now_millis();
        let mut fired = 0;

        // Callbacks run without the lock so they may schedule or cancel
        loop {
            let due = {
                let mut timers = lock(&self.timers);
                match timers.keys().next().copied() {
                    Some(key) if key.0 <= now => timers.remove(&key),
                    _ => None,
                }
            };
            match due {
                Some(callback) => {
                    callback();
                    fired += 1;
                }
                None => break,
            }
        }

        fired
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn pending(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_at(&self, at_millis: u64, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.timers).insert((at_millis, id), callback);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut timers = lock(&self.timers);
        let key = timers.keys().find(|(_, timer)| *timer == id).copied();
        match key {
            Some(key) => timers.remove(&key).is_some(),
            None => false,
        }
    }
}
