//! Isolation engine integration tests
//!
//! End-to-end tests driving `IsolationEngine` the way the navigation and
//! click interception layers do. Time is driven through `ManualClock` and
//! `ManualScheduler`. Covers rule semantics, exclusions, redirects, the
//! active toggle with automatic reactivation, multi-account assignments,
//! "always open isolated" rules and click correlation.

use a3s_isolation::{
    AlwaysOpenAction, AlwaysOpenIsolated, ClickEvent, Clock, ClickKind, ClickVerdict, DecisionReason,
    DomainIsolationRule, EngineConfig, IsolationAction, IsolationActiveState, IsolationEngine,
    ManualClock, ManualScheduler, MemoryAssignmentOracle, MultiAccountAction, NavigationRequest,
    Preferences, RequestVerdict, RuleAction, SharedPreferences, TabSnapshot, ToggleEvent,
};
use std::sync::Arc;
use std::time::Duration;

const T0: u64 = 1_700_000_000_000;

struct Harness {
    engine: IsolationEngine,
    prefs: SharedPreferences,
    clock: Arc<ManualClock>,
    scheduler: Arc<ManualScheduler>,
}

impl Harness {
    fn new(prefs: Preferences) -> Self {
        Self::with_oracle(prefs, MemoryAssignmentOracle::new())
    }

    fn with_oracle(prefs: Preferences, oracle: MemoryAssignmentOracle) -> Self {
        let prefs = SharedPreferences::new(prefs);
        let clock = Arc::new(ManualClock::new(T0));
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        let engine = IsolationEngine::builder(prefs.clone())
            .oracle(oracle)
            .clock(clock.clone())
            .scheduler(scheduler.clone())
            .build();
        Self {
            engine,
            prefs,
            clock,
            scheduler,
        }
    }

    fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    fn nav(&self, url: &str) -> NavigationRequest {
        NavigationRequest::new(url).at(self.now())
    }

    async fn isolates(&self, from: &str, to: &str) -> bool {
        let tab = TabSnapshot::new(1, from, "firefox-default");
        self.engine.reset_navigation_sequence(tab.id);
        self.engine
            .should_isolate_navigation(&tab, &self.nav(to))
            .await
    }
}

fn global(action: IsolationAction) -> Preferences {
    let mut prefs = Preferences::default();
    prefs.global.navigation.action = action;
    prefs
}

const FROM: &str = "https://example.com/page";
const SAME: &str = "https://example.com/other";
const SUB: &str = "https://sub.example.com/";
const OTHER: &str = "https://notexample.com/";

// ─── Navigation Rules ────────────────────────────────────────────

#[tokio::test]
async fn test_never_rule() {
    let h = Harness::new(global(IsolationAction::Never));
    assert!(!h.isolates(FROM, SAME).await);
    assert!(!h.isolates(FROM, SUB).await);
    assert!(!h.isolates(FROM, OTHER).await);
}

#[tokio::test]
async fn test_always_rule() {
    let h = Harness::new(global(IsolationAction::Always));
    assert!(h.isolates(FROM, SAME).await);
    assert!(h.isolates(FROM, SUB).await);
    assert!(h.isolates(FROM, OTHER).await);
}

#[tokio::test]
async fn test_always_rule_with_exclusion() {
    let mut prefs = global(IsolationAction::Always);
    prefs.global.excluded.push("notexample.com".to_string());
    let h = Harness::new(prefs);

    assert!(!h.isolates(FROM, OTHER).await);
    assert!(h.isolates(FROM, SUB).await);
}

#[tokio::test]
async fn test_not_same_domain_rule() {
    let h = Harness::new(global(IsolationAction::NotSameDomain));
    assert!(!h.isolates(FROM, SAME).await);
    assert!(!h.isolates(FROM, SUB).await);
    assert!(h.isolates(FROM, OTHER).await);
}

#[tokio::test]
async fn test_not_same_domain_exact_rule() {
    let h = Harness::new(global(IsolationAction::NotSameDomainExact));
    assert!(!h.isolates(FROM, SAME).await);
    assert!(h.isolates(FROM, SUB).await);
    assert!(h.isolates(FROM, OTHER).await);
}

#[tokio::test]
async fn test_domain_rule_overrides_global() {
    let mut prefs = global(IsolationAction::Never);
    prefs
        .domain
        .push(DomainIsolationRule::new("*.notexample.com").with_navigation(RuleAction::Always));
    let h = Harness::new(prefs);

    assert!(h.isolates(FROM, "https://www.notexample.com/").await);
    assert!(!h.isolates(FROM, "https://unrelated.org/").await);
}

#[tokio::test]
async fn test_ports_are_different_domains() {
    let h = Harness::new(global(IsolationAction::NotSameDomain));
    assert!(!h.isolates("http://localhost:8080/", "http://localhost:8080/x").await);
    assert!(h.isolates("http://localhost:8080/", "http://localhost:9000/").await);
}

// ─── Redirects ───────────────────────────────────────────────────

#[tokio::test]
async fn test_redirect_to_different_domain_isolates() {
    let h = Harness::new(global(IsolationAction::NotSameDomain));
    let tab = TabSnapshot::new(3, FROM, "firefox-default");

    let first = h.nav("https://example.com/out?to=notexample");
    assert!(!h.engine.should_isolate_navigation(&tab, &first).await);

    let redirected = h.nav(OTHER).redirected(1);
    assert!(h.engine.should_isolate_navigation(&tab, &redirected).await);
}

#[tokio::test]
async fn test_redirect_back_to_same_domain_isolates_once() {
    let h = Harness::new(global(IsolationAction::NotSameDomainExact));
    let tab = TabSnapshot::new(3, FROM, "firefox-default");

    assert!(h.engine.should_isolate_navigation(&tab, &h.nav(SUB)).await);

    h.clock.advance(Duration::from_millis(200));
    let back = h.nav("https://example.com/login/callback").redirected(1);
    let decision = h.engine.evaluate_navigation(&tab, &back).await;
    assert!(!decision.isolate);
    assert_eq!(decision.reason, DecisionReason::RedirectGuard);

    // a fresh navigation started by the caller is evaluated normally
    h.engine.reset_navigation_sequence(tab.id);
    assert!(h.engine.should_isolate_navigation(&tab, &h.nav(SUB)).await);
}

// ─── Toggle & Reactivation ───────────────────────────────────────

#[tokio::test]
async fn test_toggle_off_suppresses_always() {
    let h = Harness::new(global(IsolationAction::Always));
    h.engine.set_active_state(false);

    assert!(!h.isolates(FROM, SAME).await);
    assert!(!h.isolates(FROM, SUB).await);
    assert!(!h.isolates(FROM, OTHER).await);
    assert_eq!(
        h.engine.active_state(),
        IsolationActiveState {
            active: false,
            reactivate_at_epoch_ms: None
        }
    );
}

#[tokio::test]
async fn test_reactivation_after_delay() {
    let mut prefs = global(IsolationAction::Always);
    prefs.global.reactivate_delay_seconds = 3;
    let h = Harness::new(prefs);
    let mut events = h.engine.subscribe();

    h.engine.set_active_state(false);
    assert_eq!(h.engine.active_state().reactivate_at_epoch_ms, Some(T0 + 3_000));

    h.scheduler.advance(Duration::from_secs(1));
    assert!(!h.isolates(FROM, OTHER).await);

    h.scheduler.advance(Duration::from_secs(4));
    assert!(h.isolates(FROM, OTHER).await);
    assert!(h.engine.active_state().active);

    h.scheduler.advance(Duration::from_secs(30));
    let mut reactivations = 0;
    while let Ok(event) = events.try_recv() {
        if event == ToggleEvent::Reactivated {
            reactivations += 1;
        }
    }
    assert_eq!(reactivations, 1);
}

#[tokio::test]
async fn test_manual_reactivation_cancels_timer() {
    let mut prefs = global(IsolationAction::Always);
    prefs.global.reactivate_delay_seconds = 3;
    let h = Harness::new(prefs);
    let mut events = h.engine.subscribe();

    h.engine.set_active_state(false);
    h.engine.set_active_state(true);
    assert_eq!(h.scheduler.pending(), 0);

    h.scheduler.advance(Duration::from_secs(10));
    let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert_eq!(
        received,
        vec![
            ToggleEvent::Deactivated {
                reactivate_at_epoch_ms: Some(T0 + 3_000)
            },
            ToggleEvent::Activated,
        ]
    );
}

#[tokio::test]
async fn test_restore_persisted_state() {
    let h = Harness::new(global(IsolationAction::Always));
    h.engine.restore_active_state(IsolationActiveState {
        active: false,
        reactivate_at_epoch_ms: Some(T0 + 2_000),
    });
    assert!(!h.isolates(FROM, OTHER).await);

    h.scheduler.advance(Duration::from_secs(2));
    assert!(h.isolates(FROM, OTHER).await);
}

#[tokio::test]
async fn test_delay_change_applies_to_next_deactivation() {
    let h = Harness::new(global(IsolationAction::Always));
    h.engine.set_active_state(false);
    assert!(h.engine.active_state().reactivate_at_epoch_ms.is_none());

    h.prefs.update(|p| p.global.reactivate_delay_seconds = 60);
    h.engine.set_active_state(false);
    assert_eq!(h.engine.active_state().reactivate_at_epoch_ms, Some(T0 + 60_000));
}

// ─── Multi-Account Assignments ───────────────────────────────────

#[tokio::test]
async fn test_multi_account_assignment_prevents_isolation() {
    let mut prefs = global(IsolationAction::Always);
    prefs.global.multi_account.action = MultiAccountAction::Enabled;
    let oracle = MemoryAssignmentOracle::new();
    oracle.assign("notexample.com", "firefox-container-4");
    let h = Harness::with_oracle(prefs, oracle);

    assert!(!h.isolates(FROM, OTHER).await);
}

#[tokio::test]
async fn test_multi_account_without_assignment_applies_rules() {
    let mut prefs = global(IsolationAction::Always);
    prefs.global.multi_account.action = MultiAccountAction::Enabled;
    let h = Harness::new(prefs);

    assert!(h.isolates(FROM, OTHER).await);
}

// ─── Always Open Isolated ────────────────────────────────────────

fn always_open(pattern: &str) -> Preferences {
    let mut prefs = Preferences::default();
    prefs.domain.push(DomainIsolationRule::new(pattern).with_always_open(
        AlwaysOpenIsolated {
            action: AlwaysOpenAction::Always,
            ..Default::default()
        },
    ));
    prefs
}

#[tokio::test]
async fn test_always_open_from_permanent_tab() {
    let h = Harness::new(always_open("notexample.com"));
    let tab = TabSnapshot::new(1, FROM, "firefox-default");

    let decision = h.engine.evaluate_navigation(&tab, &h.nav(OTHER)).await;
    assert!(decision.isolate);
    assert_eq!(decision.reason, DecisionReason::AlwaysOpenIsolated);
}

#[tokio::test]
async fn test_always_open_from_isolated_tab_same_domain() {
    let h = Harness::new(always_open("notexample.com"));
    let tab = TabSnapshot::isolated(6, "https://notexample.com/start", "firefox-container-12");

    assert!(!h.engine.should_isolate_navigation(&tab, &h.nav(OTHER)).await);
}

#[tokio::test]
async fn test_always_open_ignores_toggle() {
    let h = Harness::new(always_open("notexample.com"));
    h.engine.set_active_state(false);

    assert!(h.isolates(FROM, OTHER).await);
    assert!(!h.isolates(FROM, "https://unrelated.org/").await);
}

// ─── Click Correlation ───────────────────────────────────────────

fn middle_click_always() -> Preferences {
    let mut prefs = Preferences::default();
    prefs.global.mouse_click.middle.action = IsolationAction::Always;
    prefs
}

fn origin_tab() -> TabSnapshot {
    TabSnapshot::new(1, FROM, "firefox-default")
}

#[tokio::test]
async fn test_click_matched_by_opener_reloads() {
    let h = Harness::new(middle_click_always());
    let click = ClickEvent::new(ClickKind::Middle, OTHER, origin_tab()).at(T0);
    assert!(h.engine.register_click(&click));

    let new_tab = TabSnapshot::new(2, "about:blank", "firefox-default").with_opener(1);
    let verdict = h.engine.should_isolate_mouse_click(&h.nav(OTHER), &new_tab, Some(&origin_tab()));
    assert_eq!(verdict, ClickVerdict::Reload);
    assert_eq!(h.engine.pending_clicks(), 0);
}

#[tokio::test]
async fn test_click_matched_by_origin_url_reloads() {
    let h = Harness::new(middle_click_always());
    h.engine
        .register_click(&ClickEvent::new(ClickKind::Middle, OTHER, origin_tab()).at(T0));

    let window = TabSnapshot::new(10, "about:blank", "firefox-default");
    let request = h.nav(OTHER).with_origin_url(FROM);
    assert_eq!(
        h.engine.should_isolate_mouse_click(&request, &window, None),
        ClickVerdict::Reload
    );
}

#[tokio::test]
async fn test_click_mismatch_keeps_entry() {
    let h = Harness::new(middle_click_always());
    h.engine
        .register_click(&ClickEvent::new(ClickKind::Middle, OTHER, origin_tab()).at(T0));

    let stranger = TabSnapshot::new(7, "https://unrelated.org", "firefox-default").with_opener(8);
    let request = h.nav(OTHER).with_origin_url("https://unrelated.org");
    assert_eq!(
        h.engine.should_isolate_mouse_click(&request, &stranger, None),
        ClickVerdict::PassThrough
    );
    assert_eq!(h.engine.click_trigger_count(OTHER), Some(2));
    assert_eq!(h.engine.pending_clicks(), 1);
}

#[tokio::test]
async fn test_left_click_same_tab_reloads() {
    let mut prefs = Preferences::default();
    prefs.global.mouse_click.left.action = IsolationAction::NotSameDomain;
    let h = Harness::new(prefs);

    h.engine
        .register_click(&ClickEvent::new(ClickKind::Left, OTHER, origin_tab()).at(T0));
    let verdict = h.engine.evaluate_request(&origin_tab(), &h.nav(OTHER), None).await;
    assert_eq!(verdict, RequestVerdict::Click(ClickVerdict::Reload));
    assert_eq!(h.engine.pending_clicks(), 0);

    // same-domain click never registers; navigation rules decide
    assert!(!h
        .engine
        .register_click(&ClickEvent::new(ClickKind::Left, SUB, origin_tab()).at(T0)));
    let verdict = h.engine.evaluate_request(&origin_tab(), &h.nav(SUB), None).await;
    assert!(!verdict.should_isolate());
}

#[tokio::test]
async fn test_pending_click_capacity() {
    let prefs = SharedPreferences::new(middle_click_always());
    let clock = Arc::new(ManualClock::new(T0));
    let engine = IsolationEngine::builder(prefs)
        .config(EngineConfig {
            pending_click_capacity: 2,
            ..Default::default()
        })
        .clock(clock.clone())
        .scheduler(Arc::new(ManualScheduler::new(clock)))
        .build();

    for url in ["https://a.org/", "https://b.org/", "https://c.org/"] {
        engine.register_click(&ClickEvent::new(ClickKind::Middle, url, origin_tab()).at(T0));
    }
    assert_eq!(engine.pending_clicks(), 2);
    assert!(engine.click_trigger_count("https://a.org/").is_none());
}

// ─── Preferences ─────────────────────────────────────────────────

#[tokio::test]
async fn test_preferences_from_json() {
    let prefs = Preferences::from_json(
        r#"{
            "global": {
                "navigation": { "action": "notSameDomain" },
                "excluded": ["*.cdn.net"]
            },
            "domain": [
                { "pattern": "/mail\\.example\\.com/i", "navigation": { "action": "always" } }
            ]
        }"#,
    )
    .unwrap();
    let h = Harness::new(prefs);

    assert!(h.isolates(FROM, OTHER).await);
    assert!(!h.isolates(FROM, "https://img.cdn.net/").await);
    assert!(h.isolates("https://mail.example.com/", "https://mail.example.com/x").await);
}
