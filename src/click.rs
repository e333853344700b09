//! Mouse-click isolation tracking
//!
//! A click that the rules say should isolate is remembered as a
//! [`PendingClickEntry`] keyed by the link URL. The network request the
//! click produces is later correlated with that entry and consumed.
//!
//! Entries are single-use. A newer click for the same URL supersedes the
//! previous entry and cancels its handle. The store is bounded: when full,
//! the oldest entry is evicted, and an optional TTL expires stale ones.

use crate::config::{Preferences, TargetContainerKind};
use crate::domain::host_of;
use crate::rules::{Axis, RuleResolver};
use crate::scheduler::Clock;
use crate::types::{ClickEvent, ClickKind, NavigationRequest, TabSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cancellation flag shared between a pending entry and whoever holds it
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark as cancelled; repeated calls are no-ops
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A click waiting for the request it triggered
#[derive(Debug, Clone)]
pub struct PendingClickEntry {
    /// Unique entry id (`click-<uuid>`)
    pub id: String,

    /// Link destination the entry is keyed by
    pub url: String,

    pub click_kind: ClickKind,

    /// Tab the click happened in
    pub origin_tab: TabSnapshot,

    /// How many times this URL was clicked or requested without a match
    pub trigger_count: u32,

    /// Container kind the isolated tab should be created as
    pub target_container_kind: TargetContainerKind,

    /// Unix milliseconds when the entry was (re)registered
    pub registered_at: u64,

    pub handle: CancellationHandle,
}

impl PendingClickEntry {
    pub fn new(
        click: &ClickEvent,
        target_container_kind: TargetContainerKind,
        registered_at: u64,
    ) -> Self {
        Self {
            id: format!("click-{}", uuid::Uuid::new_v4()),
            url: click.url.clone(),
            click_kind: click.kind,
            origin_tab: click.tab.clone(),
            trigger_count: 1,
            target_container_kind,
            registered_at,
            handle: CancellationHandle::new(),
        }
    }

    fn is_expired(&self, ttl_ms: Option<u64>, now: u64) -> bool {
        ttl_ms.is_some_and(|ttl| now.saturating_sub(self.registered_at) > ttl)
    }
}

/// Bounded map of pending clicks keyed by URL
#[derive(Debug)]
pub struct PendingClicks {
    entries: HashMap<String, (u64, PendingClickEntry)>,
    capacity: usize,
    ttl_ms: Option<u64>,
    /// Insertion sequence, used to find the oldest entry
    seq: u64,
}

impl PendingClicks {
    pub fn new(capacity: usize, ttl_ms: Option<u64>) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            ttl_ms,
            seq: 0,
        }
    }

    /// Store an entry, superseding any live one for the same URL
    ///
    /// A superseded entry's handle is cancelled and its trigger count
    /// carried over (incremented). Returns the stored trigger count.
    pub fn put(&mut self, mut entry: PendingClickEntry, now: u64) -> u32 {
        if let Some((_, previous)) = self.entries.remove(&entry.url) {
            previous.handle.cancel();
            if !previous.is_expired(self.ttl_ms, now) {
                entry.trigger_count = previous.trigger_count.saturating_add(1);
            }
        }

        self.purge_expired(now);
        while self.entries.len() >= self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }

        self.seq += 1;
        let trigger_count = entry.trigger_count;
        self.entries.insert(entry.url.clone(), (self.seq, entry));
        trigger_count
    }

    /// Live entry for `url`, if any
    pub fn get(&self, url: &str, now: u64) -> Option<&PendingClickEntry> {
        self.entries
            .get(url)
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired(self.ttl_ms, now) && !entry.handle.is_cancelled())
    }

    /// Remove and return the live entry for `url`
    pub fn consume(&mut self, url: &str, now: u64) -> Option<PendingClickEntry> {
        let (_, entry) = self.entries.remove(url)?;
        if entry.handle.is_cancelled() {
            return None;
        }
        if entry.is_expired(self.ttl_ms, now) {
            tracing::warn!(url = %url, id = %entry.id, "Pending click expired");
            entry.handle.cancel();
            return None;
        }
        Some(entry)
    }

    /// Cancel and drop the entry for `url`
    pub fn cancel(&mut self, url: &str) -> bool {
        match self.entries.remove(url) {
            Some((_, entry)) => {
                entry.handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Increment the trigger count of the entry for `url`
    pub fn bump(&mut self, url: &str) -> Option<u32> {
        self.entries.get_mut(url).map(|(_, entry)| {
            entry.trigger_count = entry.trigger_count.saturating_add(1);
            entry.trigger_count
        })
    }

    /// Drop every expired entry, returning how many were dropped
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let Some(ttl) = self.ttl_ms else {
            return 0;
        };

        let before = self.entries.len();
        self.entries.retain(|url, (_, entry)| {
            let keep = !entry.is_expired(Some(ttl), now);
            if !keep {
                tracing::warn!(url = %url, id = %entry.id, "Pending click expired");
                entry.handle.cancel();
            }
            keep
        });
        before - self.entries.len()
    }

    /// Cancel and drop everything
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, (_, entry)) in self.entries.drain() {
            entry.handle.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, (seq, _))| *seq)
            .map(|(url, _)| url.clone());

        match oldest.and_then(|url| self.entries.remove(&url)) {
            Some((_, entry)) => {
                tracing::warn!(
                    url = %entry.url,
                    id = %entry.id,
                    capacity = self.capacity,
                    "Pending click evicted"
                );
                entry.handle.cancel();
                true
            }
            None => false,
        }
    }
}

/// Outcome of correlating a request with a pending click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClickVerdict {
    /// Not click-triggered, or not meant to be isolated
    PassThrough,
    /// The request came from the clicked tab; reload it isolated
    Reload,
}

impl ClickVerdict {
    pub fn should_isolate(self) -> bool {
        self == Self::Reload
    }

    pub fn is_reload(self) -> bool {
        self == Self::Reload
    }
}

/// Registers isolating clicks and correlates requests with them
pub struct ClickTracker {
    pending: Mutex<PendingClicks>,
    clock: Arc<dyn Clock>,
}

impl ClickTracker {
    pub fn new(capacity: usize, ttl_ms: Option<u64>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: Mutex::new(PendingClicks::new(capacity, ttl_ms)),
            clock,
        }
    }

    /// Remember `click` if the click rules say it should isolate
    ///
    /// Returns whether an entry was stored.
    pub fn register(&self, prefs: &Preferences, click: &ClickEvent) -> bool {
        let resolver = RuleResolver::new(prefs);
        if resolver.is_ignored(&click.url) {
            return false;
        }
        if host_of(&click.url).is_none() {
            tracing::debug!(url = %click.url, "Non-web click target not isolated");
            return false;
        }

        let axis = Axis::from(click.kind);
        let outcome = resolver.evaluate(axis, &click.tab.url, &click.url, &click.tab.container_id);
        if !outcome.should_isolate() {
            tracing::debug!(
                axis = %axis,
                url = %click.url,
                action = ?outcome.action,
                excluded = outcome.excluded,
                "Click not isolated"
            );
            return false;
        }

        let now = self.clock.now_millis();
        let entry = PendingClickEntry::new(click, resolver.click_target_kind(click.kind), now);
        let id = entry.id.clone();
        let trigger_count = self.lock().put(entry, now);

        tracing::debug!(
            axis = %axis,
            url = %click.url,
            tab = click.tab.id,
            id = %id,
            trigger_count,
            "Click registered"
        );
        true
    }

    /// Match a request against the pending click for its URL
    ///
    /// `tab` is the tab the request runs in, `opener` the tab that opened
    /// it, if known. A match consumes the entry; a mismatch keeps it and
    /// bumps its trigger count.
    pub fn correlate(
        &self,
        request: &NavigationRequest,
        tab: &TabSnapshot,
        opener: Option<&TabSnapshot>,
    ) -> ClickVerdict {
        let now = self.clock.now_millis();
        let mut pending = self.lock();

        let Some(entry) = pending.get(&request.url, now) else {
            return ClickVerdict::PassThrough;
        };
        let origin = &entry.origin_tab;

        let opener_id = opener.map(|o| o.id).or(tab.opener_tab_id);
        let verdict = if tab.id == origin.id
            || opener_id == Some(origin.id)
            || request.origin_url.as_deref() == Some(origin.url.as_str())
        {
            ClickVerdict::Reload
        } else {
            ClickVerdict::PassThrough
        };

        match verdict {
            ClickVerdict::PassThrough => {
                let trigger_count = pending.bump(&request.url);
                tracing::debug!(
                    url = %request.url,
                    tab = tab.id,
                    trigger_count = ?trigger_count,
                    "Request does not match pending click"
                );
            }
            _ => {
                if let Some(entry) = pending.consume(&request.url, now) {
                    tracing::debug!(
                        url = %request.url,
                        tab = tab.id,
                        id = %entry.id,
                        verdict = ?verdict,
                        "Pending click consumed"
                    );
                }
            }
        }

        verdict
    }

    /// Trigger count of the live entry for `url`
    pub fn trigger_count(&self, url: &str) -> Option<u32> {
        let now = self.clock.now_millis();
        self.lock().get(url, now).map(|entry| entry.trigger_count)
    }

    /// Drop the entry for `url`
    pub fn cancel(&self, url: &str) -> bool {
        self.lock().cancel(url)
    }

    /// Drop every pending click
    pub fn clear(&self) -> usize {
        let cleared = self.lock().clear();
        if cleared > 0 {
            tracing::debug!(count = cleared, "Pending clicks cleared");
        }
        cleared
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, PendingClicks> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
