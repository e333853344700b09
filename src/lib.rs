//! # a3s-isolation
//!
//! Isolation decision engine for browser navigations and link clicks.
//!
//! ## Overview
//!
//! `a3s-isolation` decides, for every navigation request and mouse click a
//! browser extension intercepts, whether it should be moved into a fresh
//! disposable browsing context. Decisions come from a user-editable
//! preference tree (global rules plus ordered per-domain rules), a global
//! on/off switch with delayed automatic reactivation, and an optional
//! external container-assignment capability.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_isolation::{
//!     IsolationAction, IsolationEngine, NavigationRequest, Preferences, SharedPreferences,
//!     TabSnapshot,
//! };
//!
//! # async fn example() {
//! let mut prefs = Preferences::default();
//! prefs.global.navigation.action = IsolationAction::NotSameDomain;
//! let engine = IsolationEngine::new(SharedPreferences::new(prefs));
//!
//! let tab = TabSnapshot::new(1, "https://example.com", "firefox-default");
//! let request = NavigationRequest::new("https://other.org/");
//!
//! assert!(engine.should_isolate_navigation(&tab, &request).await);
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **domain**: host comparison and domain-pattern matching
//! - **rules**: per-axis action resolution and exclusions
//! - **navigation**: navigation verdicts and the redirect guard
//! - **click**: pending-click store and request correlation
//! - **toggle** / **scheduler**: active state and automatic reactivation
//! - **oracle**: external container-assignment capability
//! - **IsolationEngine**: facade tying it together

pub mod click;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod navigation;
pub mod oracle;
pub mod rules;
pub mod scheduler;
pub mod toggle;
pub mod types;

// Re-export core types
pub use click::{CancellationHandle, ClickTracker, ClickVerdict, PendingClickEntry, PendingClicks};
pub use config::{
    AlwaysOpenAction, AlwaysOpenIsolated, DomainIsolationRule, EngineConfig,
    GlobalIsolationRules, IsolationAction, MultiAccountAction, PreferenceSource, Preferences,
    RuleAction, SharedPreferences, TargetContainerKind,
};
pub use domain::{host_of, matches_pattern, same_domain, validate_pattern};
pub use engine::{IsolationEngine, IsolationEngineBuilder, RequestVerdict};
pub use error::{IsolationError, Result};
pub use navigation::{DecisionReason, NavigationDecider, NavigationDecision, RedirectGuard};
pub use oracle::{AssignmentOracle, MemoryAssignmentOracle, NoAssignments};
pub use rules::{Axis, RuleOutcome, RuleResolver};
pub use scheduler::{
    Clock, ManualClock, ManualScheduler, Scheduler, SystemClock, TimerCallback, TimerId,
    TokioScheduler,
};
pub use toggle::{IsolationToggle, ToggleEvent};
pub use types::{
    Assignment, ClickEvent, ClickKind, ContainerKind, IsolationActiveState, NavigationRequest,
    TabSnapshot,
};
