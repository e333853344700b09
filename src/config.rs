//! Preference tree and engine configuration
//!
//! Provides:
//! - [`Preferences`]: global isolation rules plus the ordered per-domain rule list
//! - [`EngineConfig`]: engine tunables (pending-click bounds, redirect guard window)
//! - [`PreferenceSource`]: where the engine reads preferences from on every evaluation
//!
//! Everything deserializes from camelCase JSON with every field defaulted,
//! so partial documents are valid.

use crate::domain::validate_pattern;
use crate::error::{IsolationError, Result};
use crate::types::ClickKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

// ============================================================================
// Actions
// ============================================================================

/// Resolved isolation action for one interaction axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IsolationAction {
    /// Never isolate
    #[default]
    Never,
    /// Always isolate
    Always,
    /// Isolate unless origin and target share a registrable domain
    NotSameDomain,
    /// Isolate unless origin and target have the exact same hostname
    NotSameDomainExact,
}

/// Per-domain action, which may defer to the global rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleAction {
    #[default]
    UseGlobal,
    Never,
    Always,
    NotSameDomain,
    NotSameDomainExact,
}

impl RuleAction {
    /// The concrete action, or `None` when the global rule applies
    pub fn resolve(self) -> Option<IsolationAction> {
        match self {
            Self::UseGlobal => None,
            Self::Never => Some(IsolationAction::Never),
            Self::Always => Some(IsolationAction::Always),
            Self::NotSameDomain => Some(IsolationAction::NotSameDomain),
            Self::NotSameDomainExact => Some(IsolationAction::NotSameDomainExact),
        }
    }
}

/// Whether a domain is always opened in a fresh isolated context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlwaysOpenAction {
    #[default]
    Disabled,
    Always,
}

/// Whether the external container-assignment capability is consulted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MultiAccountAction {
    #[default]
    Disabled,
    Enabled,
}

/// Kind of isolated context a click should open in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetContainerKind {
    /// Regular disposable container
    #[default]
    Default,
    /// Disposable container that also deletes its browsing history
    DeletesHistory,
}

// ============================================================================
// Global rules
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalNavigation {
    #[serde(default)]
    pub action: IsolationAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalClick {
    #[serde(default)]
    pub action: IsolationAction,

    #[serde(default)]
    pub target_container_kind: TargetContainerKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMouseClick {
    #[serde(default)]
    pub left: GlobalClick,
    #[serde(default)]
    pub middle: GlobalClick,
    #[serde(default)]
    pub ctrlleft: GlobalClick,
}

impl GlobalMouseClick {
    pub fn get(&self, kind: ClickKind) -> &GlobalClick {
        match kind {
            ClickKind::Left => &self.left,
            ClickKind::Middle => &self.middle,
            ClickKind::CtrlLeft => &self.ctrlleft,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiAccount {
    #[serde(default)]
    pub action: MultiAccountAction,
}

/// Global isolation rules, used when no domain rule overrides them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalIsolationRules {
    #[serde(default)]
    pub navigation: GlobalNavigation,

    #[serde(default)]
    pub mouse_click: GlobalMouseClick,

    /// Target patterns for which isolation is suppressed
    #[serde(default)]
    pub excluded: Vec<String>,

    /// Origin containers for which isolation is suppressed
    #[serde(default)]
    pub excluded_containers: HashSet<String>,

    #[serde(default)]
    pub multi_account: MultiAccount,

    /// Seconds until isolation re-enables itself after being switched off (0 = never)
    #[serde(default)]
    pub reactivate_delay_seconds: u64,

    /// Targets the browser never lets an extension intercept
    #[serde(default = "default_ignored_domains")]
    pub ignored_domains: Vec<String>,
}

fn default_ignored_domains() -> Vec<String> {
    vec!["getpocket.com".to_string(), "addons.mozilla.org".to_string()]
}

impl Default for GlobalIsolationRules {
    fn default() -> Self {
        Self {
            navigation: GlobalNavigation::default(),
            mouse_click: GlobalMouseClick::default(),
            excluded: Vec::new(),
            excluded_containers: HashSet::new(),
            multi_account: MultiAccount::default(),
            reactivate_delay_seconds: 0,
            ignored_domains: default_ignored_domains(),
        }
    }
}

// ============================================================================
// Domain rules
// ============================================================================

/// "Always open isolated" settings of a domain rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlwaysOpenIsolated {
    #[serde(default)]
    pub action: AlwaysOpenAction,

    /// Do not force isolation when the origin tab is already isolated
    #[serde(default)]
    pub suppress_if_from_isolated: bool,

    /// Do not force isolation when the origin tab is in a permanent container
    #[serde(default)]
    pub suppress_if_from_permanent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainNavigation {
    #[serde(default)]
    pub action: RuleAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainClick {
    #[serde(default)]
    pub action: RuleAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainMouseClick {
    #[serde(default)]
    pub left: DomainClick,
    #[serde(default)]
    pub middle: DomainClick,
    #[serde(default)]
    pub ctrlleft: DomainClick,
}

impl DomainMouseClick {
    pub fn get(&self, kind: ClickKind) -> &DomainClick {
        match kind {
            ClickKind::Left => &self.left,
            ClickKind::Middle => &self.middle,
            ClickKind::CtrlLeft => &self.ctrlleft,
        }
    }
}

/// Isolation rule for destinations matching `pattern`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainIsolationRule {
    /// Exact hostname, `*` glob or `/regex/flags`
    pub pattern: String,

    #[serde(default)]
    pub always_open_isolated: AlwaysOpenIsolated,

    #[serde(default)]
    pub navigation: DomainNavigation,

    #[serde(default)]
    pub mouse_click: DomainMouseClick,

    #[serde(default)]
    pub excluded: Vec<String>,

    #[serde(default)]
    pub excluded_containers: HashSet<String>,
}

impl DomainIsolationRule {
    /// Create a rule that defers every axis to the global rules
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Default::default()
        }
    }

    pub fn with_navigation(mut self, action: RuleAction) -> Self {
        self.navigation.action = action;
        self
    }

    pub fn with_click(mut self, kind: ClickKind, action: RuleAction) -> Self {
        let click = match kind {
            ClickKind::Left => &mut self.mouse_click.left,
            ClickKind::Middle => &mut self.mouse_click.middle,
            ClickKind::CtrlLeft => &mut self.mouse_click.ctrlleft,
        };
        click.action = action;
        self
    }

    pub fn with_always_open(mut self, always_open: AlwaysOpenIsolated) -> Self {
        self.always_open_isolated = always_open;
        self
    }

    pub fn with_excluded(mut self, pattern: impl Into<String>) -> Self {
        self.excluded.push(pattern.into());
        self
    }

    pub fn with_excluded_container(mut self, container_id: impl Into<String>) -> Self {
        self.excluded_containers.insert(container_id.into());
        self
    }
}

// ============================================================================
// Preferences
// ============================================================================

/// Complete preference tree consulted by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub global: GlobalIsolationRules,

    /// Domain rules, evaluated in declaration order (first match wins)
    #[serde(default)]
    pub domain: Vec<DomainIsolationRule>,
}

impl Preferences {
    /// Parse preferences from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load preferences from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            IsolationError::Config(format!(
                "Failed to read preferences file {}: {}",
                path.display(),
                e
            ))
        })?;

        let prefs = Self::from_json(&json).map_err(|e| {
            IsolationError::Config(format!(
                "Failed to parse preferences file {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::debug!(
            path = %path.display(),
            domain_rules = prefs.domain.len(),
            "Preferences loaded"
        );
        Ok(prefs)
    }

    /// Check every pattern in the tree, returning all that fail to compile
    ///
    /// Invalid patterns never match during evaluation; this lets callers
    /// reject them before they silently do nothing.
    pub fn validate(&self) -> std::result::Result<(), Vec<IsolationError>> {
        let patterns = self
            .global
            .excluded
            .iter()
            .chain(self.global.ignored_domains.iter())
            .chain(self.domain.iter().flat_map(|rule| {
                std::iter::once(&rule.pattern).chain(rule.excluded.iter())
            }));

        let errors: Vec<IsolationError> = patterns
            .filter_map(|pattern| validate_pattern(pattern).err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Engine tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of pending click entries; the oldest is evicted beyond it
    #[serde(default = "default_pending_click_capacity")]
    pub pending_click_capacity: usize,

    /// Lifetime of a pending click entry (None = until consumed or superseded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_click_ttl_ms: Option<u64>,

    /// How long an isolation mark suppresses redirects of the same navigation
    #[serde(default = "default_redirect_guard_window_ms")]
    pub redirect_guard_window_ms: u64,
}

fn default_pending_click_capacity() -> usize {
    1000
}

fn default_redirect_guard_window_ms() -> u64 {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_click_capacity: default_pending_click_capacity(),
            pending_click_ttl_ms: None,
            redirect_guard_window_ms: default_redirect_guard_window_ms(),
        }
    }
}

// ============================================================================
// Preference source
// ============================================================================

/// Source of the preference tree, read fresh on every evaluation
pub trait PreferenceSource: Send + Sync {
    fn snapshot(&self) -> Preferences;
}

/// In-memory preferences that can be replaced at runtime
#[derive(Debug, Clone, Default)]
pub struct SharedPreferences {
    inner: Arc<RwLock<Preferences>>,
}

impl SharedPreferences {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            inner: Arc::new(RwLock::new(prefs)),
        }
    }

    /// Replace the whole tree
    pub fn replace(&self, prefs: Preferences) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = prefs;
    }

    /// Modify the tree in place
    pub fn update(&self, f: impl FnOnce(&mut Preferences)) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut inner);
    }
}

impl PreferenceSource for SharedPreferences {
    fn snapshot(&self) -> Preferences {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl PreferenceSource for Preferences {
    fn snapshot(&self) -> Preferences {
        self.clone()
    }
}
