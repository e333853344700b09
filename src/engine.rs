//! Isolation engine facade
//!
//! `IsolationEngine` is what the navigation- and click-interception
//! collaborators talk to. It reads preferences fresh on every call, owns
//! the active toggle, the pending-click store and the redirect guard, and
//! consults the assignment oracle when multi-account support is enabled.

use crate::click::{ClickTracker, ClickVerdict};
use crate::config::{EngineConfig, PreferenceSource, Preferences};
use crate::navigation::{NavigationDecider, NavigationDecision};
use crate::oracle::{AssignmentOracle, NoAssignments};
use crate::scheduler::{Clock, Scheduler, SystemClock, TokioScheduler};
use crate::toggle::{IsolationToggle, ToggleEvent};
use crate::types::{ClickEvent, IsolationActiveState, NavigationRequest, TabSnapshot};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Combined verdict for a request that may have been triggered by a click
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestVerdict {
    /// Matched a pending click
    Click(ClickVerdict),
    /// Decided by the navigation rules
    Navigation(NavigationDecision),
}

impl RequestVerdict {
    pub fn should_isolate(&self) -> bool {
        match self {
            Self::Click(verdict) => verdict.should_isolate(),
            Self::Navigation(decision) => decision.isolate,
        }
    }

    pub fn is_reload(&self) -> bool {
        matches!(self, Self::Click(ClickVerdict::Reload))
    }
}

/// Isolation decision engine
pub struct IsolationEngine {
    preferences: Box<dyn PreferenceSource>,
    oracle: Arc<dyn AssignmentOracle>,
    config: EngineConfig,
    toggle: IsolationToggle,
    clicks: ClickTracker,
    navigation: NavigationDecider,
}

impl IsolationEngine {
    /// Create an engine with default tunables, no assignment oracle and
    /// wall-clock timers on the current tokio runtime
    pub fn new(preferences: impl PreferenceSource + 'static) -> Self {
        Self::builder(preferences).build()
    }

    pub fn builder(preferences: impl PreferenceSource + 'static) -> IsolationEngineBuilder {
        IsolationEngineBuilder {
            preferences: Box::new(preferences),
            oracle: Arc::new(NoAssignments),
            config: EngineConfig::default(),
            clock: None,
            scheduler: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current preference snapshot
    pub fn preferences(&self) -> Preferences {
        self.preferences.snapshot()
    }

    /// Whether a navigation request in `tab` should be isolated
    pub async fn should_isolate_navigation(
        &self,
        tab: &TabSnapshot,
        request: &NavigationRequest,
    ) -> bool {
        self.evaluate_navigation(tab, request).await.isolate
    }

    /// Navigation verdict together with the reason for it
    pub async fn evaluate_navigation(
        &self,
        tab: &TabSnapshot,
        request: &NavigationRequest,
    ) -> NavigationDecision {
        let prefs = self.preferences.snapshot();
        let active = self.toggle.is_active();
        self.navigation
            .decide(&prefs, active, tab, request, self.oracle.as_ref())
            .await
    }

    /// Correlate a request with the click that may have produced it
    ///
    /// `tab` is the tab the request runs in and `opener` the tab that
    /// opened it, if known.
    pub fn should_isolate_mouse_click(
        &self,
        request: &NavigationRequest,
        tab: &TabSnapshot,
        opener: Option<&TabSnapshot>,
    ) -> ClickVerdict {
        self.clicks.correlate(request, tab, opener)
    }

    /// Record a link click; ignored while isolation is off
    pub fn register_click(&self, click: &ClickEvent) -> bool {
        if !self.toggle.is_active() {
            tracing::debug!(url = %click.url, tab = click.tab.id, "Isolation inactive, click ignored");
            return false;
        }
        let prefs = self.preferences.snapshot();
        self.clicks.register(&prefs, click)
    }

    /// Decide a request, preferring a pending click match over the
    /// navigation rules
    pub async fn evaluate_request(
        &self,
        tab: &TabSnapshot,
        request: &NavigationRequest,
        opener: Option<&TabSnapshot>,
    ) -> RequestVerdict {
        match self.clicks.correlate(request, tab, opener) {
            ClickVerdict::PassThrough => {
                RequestVerdict::Navigation(self.evaluate_navigation(tab, request).await)
            }
            verdict => RequestVerdict::Click(verdict),
        }
    }

    /// Switch isolation on or off
    ///
    /// Switching off uses the configured `reactivateDelaySeconds` and drops
    /// every pending click.
    pub fn set_active_state(&self, active: bool) {
        let delay = self.preferences.snapshot().global.reactivate_delay_seconds;
        self.toggle.set_active(active, delay);
        if !active {
            self.clicks.clear();
        }
    }

    pub fn active_state(&self) -> IsolationActiveState {
        self.toggle.state()
    }

    /// Resume a persisted active state, rescheduling reactivation if due later
    pub fn restore_active_state(&self, state: IsolationActiveState) {
        self.toggle.restore(state);
        if !self.toggle.is_active() {
            self.clicks.clear();
        }
    }

    /// The caller navigated `tab_id` itself; start a new navigation sequence
    pub fn reset_navigation_sequence(&self, tab_id: u64) -> bool {
        self.navigation.guard().reset(tab_id)
    }

    /// Subscribe to toggle transitions
    pub fn subscribe(&self) -> broadcast::Receiver<ToggleEvent> {
        self.toggle.subscribe()
    }

    /// Number of clicks waiting for their request
    pub fn pending_clicks(&self) -> usize {
        self.clicks.pending()
    }

    /// Trigger count of the pending click for `url`
    pub fn click_trigger_count(&self, url: &str) -> Option<u32> {
        self.clicks.trigger_count(url)
    }
}

/// Builder for [`IsolationEngine`]
pub struct IsolationEngineBuilder {
    preferences: Box<dyn PreferenceSource>,
    oracle: Arc<dyn AssignmentOracle>,
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl IsolationEngineBuilder {
    pub fn oracle(mut self, oracle: impl AssignmentOracle + 'static) -> Self {
        self.oracle = Arc::new(oracle);
        self
    }

    pub fn shared_oracle(mut self, oracle: Arc<dyn AssignmentOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Timer service for automatic reactivation
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> IsolationEngine {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new(clock.clone())) as Arc<dyn Scheduler>);

        IsolationEngine {
            preferences: self.preferences,
            oracle: self.oracle,
            toggle: IsolationToggle::new(scheduler, clock.clone()),
            clicks: ClickTracker::new(
                self.config.pending_click_capacity,
                self.config.pending_click_ttl_ms,
                clock,
            ),
            navigation: NavigationDecider::new(self.config.redirect_guard_window_ms),
            config: self.config,
        }
    }
}
