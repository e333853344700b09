//! Isolation on/off switch with delayed automatic reactivation
//!
//! Switching isolation off with a non-zero reactivation delay schedules a
//! one-shot timer at an absolute deadline. The timer callback is
//! idempotent: a stale or repeated fire is a no-op.

use crate::scheduler::{Clock, Scheduler, TimerId};
use crate::types::IsolationActiveState;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Toggle transitions, for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleEvent {
    /// Isolation switched off, with the pending reactivation time if any
    Deactivated { reactivate_at_epoch_ms: Option<u64> },
    /// Isolation switched on by the caller
    Activated,
    /// Isolation switched on by the reactivation timer
    Reactivated,
}

#[derive(Debug)]
struct ToggleInner {
    active: bool,
    reactivate_at_epoch_ms: Option<u64>,
    timer: Option<TimerId>,
    /// Bumped on every transition so stale timer callbacks can tell
    generation: u64,
}

/// Owner of the process-wide [`IsolationActiveState`]
pub struct IsolationToggle {
    inner: Arc<Mutex<ToggleInner>>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<ToggleEvent>,
}

impl IsolationToggle {
    /// Create an active toggle
    pub fn new(scheduler: Arc<dyn Scheduler>, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Mutex::new(ToggleInner {
                active: true,
                reactivate_at_epoch_ms: None,
                timer: None,
                generation: 0,
            })),
            scheduler,
            clock,
            event_tx,
        }
    }

    /// Subscribe to toggle transitions
    pub fn subscribe(&self) -> broadcast::Receiver<ToggleEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner).active
    }

    pub fn state(&self) -> IsolationActiveState {
        let inner = lock(&self.inner);
        IsolationActiveState {
            active: inner.active,
            reactivate_at_epoch_ms: inner.reactivate_at_epoch_ms,
        }
    }

    /// Switch isolation on or off
    ///
    /// Switching off with `reactivate_delay_seconds > 0` schedules automatic
    /// reactivation; switching on cancels any pending reactivation.
    pub fn set_active(&self, active: bool, reactivate_delay_seconds: u64) {
        if active {
            self.activate();
            return;
        }

        let reactivate_at = (reactivate_delay_seconds > 0).then(|| {
            self.clock
                .now_millis()
                .saturating_add(reactivate_delay_seconds.saturating_mul(1000))
        });
        self.deactivate(reactivate_at);
    }

    /// Resume a previously persisted state
    ///
    /// A reactivation deadline already in the past activates immediately;
    /// a future one is rescheduled at the same absolute time.
    pub fn restore(&self, state: IsolationActiveState) {
        if state.active {
            self.activate();
            return;
        }

        match state.reactivate_at_epoch_ms {
            Some(at) if at <= self.clock.now_millis() => {
                let generation = self.deactivate(None);
                reactivate(&self.inner, &self.event_tx, generation, true);
            }
            reactivate_at => {
                self.deactivate(reactivate_at);
            }
        }
    }

    fn activate(&self) {
        let previous = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.active = true;
            inner.reactivate_at_epoch_ms = None;
            inner.timer.take()
        };
        if let Some(timer) = previous {
            self.scheduler.cancel(timer);
        }

        tracing::info!("Isolation activated");
        let _ = self.event_tx.send(ToggleEvent::Activated);
    }

    /// Returns the generation of the new state
    fn deactivate(&self, reactivate_at: Option<u64>) -> u64 {
        let (generation, previous) = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.active = false;
            inner.reactivate_at_epoch_ms = reactivate_at;
            (inner.generation, inner.timer.take())
        };
        if let Some(timer) = previous {
            self.scheduler.cancel(timer);
        }

        if let Some(at) = reactivate_at {
            let inner = self.inner.clone();
            let event_tx = self.event_tx.clone();
            let timer = self.scheduler.schedule_at(
                at,
                Box::new(move || {
                    reactivate(&inner, &event_tx, generation, false);
                }),
            );

            let mut inner = lock(&self.inner);
            if inner.generation == generation {
                inner.timer = Some(timer);
            } else {
                drop(inner);
                self.scheduler.cancel(timer);
            }
        }

        let reactivate_at_utc = reactivate_at
            .and_then(|ms| chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms as i64));
        tracing::info!(reactivate_at = ?reactivate_at_utc, "Isolation deactivated");
        let _ = self.event_tx.send(ToggleEvent::Deactivated {
            reactivate_at_epoch_ms: reactivate_at,
        });
        generation
    }

    #[cfg(test)]
    fn fire_reactivation(&self, generation: u64) -> bool {
        reactivate(&self.inner, &self.event_tx, generation, false)
    }

    #[cfg(test)]
    fn generation(&self) -> u64 {
        lock(&self.inner).generation
    }
}

/// Timer body: switch back on if the state is still the one that scheduled it
fn reactivate(
    inner: &Mutex<ToggleInner>,
    event_tx: &broadcast::Sender<ToggleEvent>,
    generation: u64,
    restoring: bool,
) -> bool {
    {
        let mut inner = lock(inner);
        let pending = restoring || inner.reactivate_at_epoch_ms.is_some();
        if inner.generation != generation || inner.active || !pending {
            return false;
        }
        inner.active = true;
        inner.reactivate_at_epoch_ms = None;
        inner.timer = None;
        inner.generation += 1;
    }

    tracing::info!("Isolation reactivated");
    let _ = event_tx.send(ToggleEvent::Reactivated);
    true
}

fn lock(inner: &Mutex<ToggleInner>) -> MutexGuard<'_, ToggleInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}
