//! Navigation isolation decision
//!
//! Evaluation order for one request:
//!
//! 1. ignored domains and non-web targets pass through
//! 2. redirect guard: continuations of a navigation that was just isolated
//!    pass through
//! 3. "always open isolated" domain rule (independent of the toggle)
//! 4. active toggle
//! 5. navigation action, then exclusions
//! 6. multi-account assignment, only consulted when about to isolate

use crate::config::{AlwaysOpenAction, IsolationAction, MultiAccountAction, Preferences};
use crate::domain::{host_of, same_domain};
use crate::oracle::AssignmentOracle;
use crate::rules::{Axis, RuleResolver};
use crate::types::{NavigationRequest, TabSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Query parameter prefix left by anti-automation challenge pages
const CHALLENGE_PARAM_PREFIX: &str = "__cf_chl_";

/// Why a navigation was or was not isolated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "reason", content = "action")]
pub enum DecisionReason {
    Ignored,
    NonWebTarget,
    RedirectGuard,
    ChallengeContinuation,
    AlwaysOpenIsolated,
    AlwaysOpenSuppressed,
    Inactive,
    Action(IsolationAction),
    Excluded,
    MultiAccountAssignment,
}

/// Verdict for one navigation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDecision {
    pub isolate: bool,
    pub reason: DecisionReason,
}

impl NavigationDecision {
    pub fn isolate(reason: DecisionReason) -> Self {
        Self {
            isolate: true,
            reason,
        }
    }

    pub fn pass(reason: DecisionReason) -> Self {
        Self {
            isolate: false,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GuardMark {
    origin_host: Option<String>,
    target_host: String,
    at: u64,
}

/// Per-tab memory of the last isolation, so one logical navigation
/// isolates at most once
#[derive(Debug)]
pub struct RedirectGuard {
    window_ms: u64,
    marks: Mutex<HashMap<u64, GuardMark>>,
}

impl RedirectGuard {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            marks: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `request` in `tab_id` was isolated
    pub fn mark(&self, tab_id: u64, origin_url: &str, request: &NavigationRequest) {
        let Some(target_host) = host_of(&request.url) else {
            return;
        };
        self.lock().insert(
            tab_id,
            GuardMark {
                origin_host: host_of(origin_url),
                target_host,
                at: request.timestamp,
            },
        );
    }

    /// Whether `request` continues the navigation last isolated in `tab_id`
    pub fn check(&self, tab_id: u64, request: &NavigationRequest) -> Option<DecisionReason> {
        let mut marks = self.lock();
        let mark = marks.get(&tab_id)?;

        if request.timestamp.saturating_sub(mark.at) > self.window_ms {
            marks.remove(&tab_id);
            return None;
        }

        let host = host_of(&request.url)?;
        if request.is_redirect()
            && (host == mark.target_host || mark.origin_host.as_deref() == Some(host.as_str()))
        {
            return Some(DecisionReason::RedirectGuard);
        }

        if host == mark.target_host && (request.is_post() || has_challenge_param(&request.url)) {
            return Some(DecisionReason::ChallengeContinuation);
        }

        None
    }

    /// Forget the mark for `tab_id`; the caller navigated the tab itself
    pub fn reset(&self, tab_id: u64) -> bool {
        self.lock().remove(&tab_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, GuardMark>> {
        self.marks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn has_challenge_param(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| {
            u.query_pairs()
                .any(|(key, _)| key.starts_with(CHALLENGE_PARAM_PREFIX))
        })
        .unwrap_or(false)
}

/// Decides whether navigation requests should be isolated
pub struct NavigationDecider {
    guard: RedirectGuard,
}

impl NavigationDecider {
    pub fn new(redirect_guard_window_ms: u64) -> Self {
        Self {
            guard: RedirectGuard::new(redirect_guard_window_ms),
        }
    }

    pub fn guard(&self) -> &RedirectGuard {
        &self.guard
    }

    /// Decide for `request` happening in `tab`
    ///
    /// The tab's current URL is the origin; a tab without a web URL yet
    /// (new tab, `about:blank`) falls back to the request's origin URL.
    pub async fn decide(
        &self,
        prefs: &Preferences,
        active: bool,
        tab: &TabSnapshot,
        request: &NavigationRequest,
        oracle: &dyn AssignmentOracle,
    ) -> NavigationDecision {
        let origin_url = origin_of(tab, request);
        let decision = self.evaluate(prefs, active, tab, origin_url, request, oracle).await;

        if decision.isolate {
            self.guard.mark(tab.id, origin_url, request);
        }

        tracing::debug!(
            tab = tab.id,
            origin = %origin_url,
            target = %request.url,
            redirect = request.redirect_position,
            isolate = decision.isolate,
            reason = ?decision.reason,
            "Navigation decided"
        );
        decision
    }

    async fn evaluate(
        &self,
        prefs: &Preferences,
        active: bool,
        tab: &TabSnapshot,
        origin_url: &str,
        request: &NavigationRequest,
        oracle: &dyn AssignmentOracle,
    ) -> NavigationDecision {
        let target = request.url.as_str();
        let resolver = RuleResolver::new(prefs);

        if resolver.is_ignored(target) {
            return NavigationDecision::pass(DecisionReason::Ignored);
        }
        if host_of(target).is_none() {
            return NavigationDecision::pass(DecisionReason::NonWebTarget);
        }
        if let Some(reason) = self.guard.check(tab.id, request) {
            return NavigationDecision::pass(reason);
        }

        if let Some(always) = resolver.always_open(target) {
            if always.action == AlwaysOpenAction::Always {
                if tab.is_isolated() {
                    if same_domain(origin_url, target) {
                        return NavigationDecision::pass(DecisionReason::AlwaysOpenSuppressed);
                    }
                    if !always.suppress_if_from_isolated {
                        return NavigationDecision::isolate(DecisionReason::AlwaysOpenIsolated);
                    }
                } else if !always.suppress_if_from_permanent {
                    return NavigationDecision::isolate(DecisionReason::AlwaysOpenIsolated);
                }
            }
        }

        if !active {
            return NavigationDecision::pass(DecisionReason::Inactive);
        }

        let outcome = resolver.evaluate(Axis::Navigation, origin_url, target, &tab.container_id);
        if outcome.excluded {
            return NavigationDecision::pass(DecisionReason::Excluded);
        }
        if !outcome.isolates {
            return NavigationDecision::pass(DecisionReason::Action(outcome.action));
        }

        if prefs.global.multi_account.action == MultiAccountAction::Enabled {
            match oracle.query_assignment(target).await {
                Ok(Some(assignment)) => {
                    tracing::debug!(
                        target = %target,
                        container = %assignment.owner_container_id,
                        "Target assigned to container, not isolating"
                    );
                    return NavigationDecision::pass(DecisionReason::MultiAccountAssignment);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(target = %target, error = %e, "Assignment query failed, assuming none");
                }
            }
        }

        NavigationDecision::isolate(DecisionReason::Action(outcome.action))
    }
}

fn origin_of<'a>(tab: &'a TabSnapshot, request: &'a NavigationRequest) -> &'a str {
    match request.origin_url.as_deref() {
        Some(origin) if host_of(&tab.url).is_none() => origin,
        _ => tab.url.as_str(),
    }
}
