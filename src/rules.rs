//! Rule resolution
//!
//! Picks the single applicable action per interaction axis. Domain rules
//! are scanned in declaration order and the first one whose pattern
//! matches the target wins; an axis set to `useGlobal` (or no matching
//! rule) falls back to the global rules. Exclusions are checked after
//! resolution and can only suppress isolation.

use crate::config::{
    AlwaysOpenIsolated, DomainIsolationRule, IsolationAction, Preferences, TargetContainerKind,
};
use crate::domain::{host_of, matches_pattern, same_domain};
use crate::types::ClickKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Interaction axis a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Axis {
    Navigation,
    LeftClick,
    MiddleClick,
    CtrlLeftClick,
}

impl From<ClickKind> for Axis {
    fn from(kind: ClickKind) -> Self {
        match kind {
            ClickKind::Left => Self::LeftClick,
            ClickKind::Middle => Self::MiddleClick,
            ClickKind::CtrlLeft => Self::CtrlLeftClick,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigation => write!(f, "navigation"),
            Self::LeftClick => write!(f, "left-click"),
            Self::MiddleClick => write!(f, "middle-click"),
            Self::CtrlLeftClick => write!(f, "ctrl-left-click"),
        }
    }
}

impl IsolationAction {
    /// Whether this action calls for isolation between `origin` and `target`
    ///
    /// An origin without a host (new tab, `about:blank`) is never
    /// "different" from anything, so only `Always` isolates from it.
    pub fn isolates(self, origin_url: &str, target_url: &str) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::NotSameDomain => {
                host_of(origin_url).is_some() && !same_domain(origin_url, target_url)
            }
            Self::NotSameDomainExact => match (host_of(origin_url), host_of(target_url)) {
                (Some(origin), Some(target)) => origin != target,
                _ => false,
            },
        }
    }
}

/// Outcome of resolving and applying one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleOutcome {
    /// Action the rules resolved to
    pub action: IsolationAction,

    /// Whether the action calls for isolation, before exclusions
    pub isolates: bool,

    /// Whether an exclusion suppressed the isolation
    pub excluded: bool,
}

impl RuleOutcome {
    /// Final verdict after exclusions
    pub fn should_isolate(&self) -> bool {
        self.isolates && !self.excluded
    }
}

/// Resolves actions against one snapshot of the preference tree
pub struct RuleResolver<'a> {
    prefs: &'a Preferences,
}

impl<'a> RuleResolver<'a> {
    pub fn new(prefs: &'a Preferences) -> Self {
        Self { prefs }
    }

    /// First domain rule whose pattern matches the target
    pub fn select_rule(&self, target_url: &str) -> Option<&'a DomainIsolationRule> {
        self.prefs
            .domain
            .iter()
            .find(|rule| matches_pattern(target_url, &rule.pattern))
    }

    /// Resolve the action for `axis`, letting a matching domain rule override the global one
    pub fn resolve_action(&self, axis: Axis, target_url: &str) -> IsolationAction {
        let from_rule = self.select_rule(target_url).and_then(|rule| {
            match axis {
                Axis::Navigation => rule.navigation.action,
                Axis::LeftClick => rule.mouse_click.left.action,
                Axis::MiddleClick => rule.mouse_click.middle.action,
                Axis::CtrlLeftClick => rule.mouse_click.ctrlleft.action,
            }
            .resolve()
        });

        from_rule.unwrap_or_else(|| self.global_action(axis))
    }

    /// Whether isolation towards `target_url` from `container_id` is excluded
    ///
    /// Uses the selected domain rule's exclusions, or the global ones when
    /// no rule matches.
    pub fn is_excluded(&self, axis: Axis, target_url: &str, container_id: &str) -> bool {
        let (excluded, excluded_containers) = match self.select_rule(target_url) {
            Some(rule) => (&rule.excluded, &rule.excluded_containers),
            None => (&self.prefs.global.excluded, &self.prefs.global.excluded_containers),
        };

        let by_pattern = excluded
            .iter()
            .find(|pattern| matches_pattern(target_url, pattern));
        if let Some(pattern) = by_pattern {
            tracing::trace!(axis = %axis, target = %target_url, pattern = %pattern, "Target excluded");
            return true;
        }

        if excluded_containers.contains(container_id) {
            tracing::trace!(axis = %axis, container = %container_id, "Container excluded");
            return true;
        }

        false
    }

    /// Whether the target is one the browser never lets us intercept
    pub fn is_ignored(&self, target_url: &str) -> bool {
        self.prefs
            .global
            .ignored_domains
            .iter()
            .any(|pattern| matches_pattern(target_url, pattern))
    }

    /// "Always open isolated" settings of the rule selected for the target
    pub fn always_open(&self, target_url: &str) -> Option<&'a AlwaysOpenIsolated> {
        self.select_rule(target_url)
            .map(|rule| &rule.always_open_isolated)
    }

    /// Container kind a click of this kind should open in
    pub fn click_target_kind(&self, kind: ClickKind) -> TargetContainerKind {
        self.prefs.global.mouse_click.get(kind).target_container_kind
    }

    /// Resolve the action, apply it, then apply exclusions
    pub fn evaluate(
        &self,
        axis: Axis,
        origin_url: &str,
        target_url: &str,
        container_id: &str,
    ) -> RuleOutcome {
        let action = self.resolve_action(axis, target_url);
        let isolates = action.isolates(origin_url, target_url);
        let excluded = isolates && self.is_excluded(axis, target_url, container_id);

        RuleOutcome {
            action,
            isolates,
            excluded,
        }
    }

    fn global_action(&self, axis: Axis) -> IsolationAction {
        let global = &self.prefs.global;
        match axis {
            Axis::Navigation => global.navigation.action,
            Axis::LeftClick => global.mouse_click.left.action,
            Axis::MiddleClick => global.mouse_click.middle.action,
            Axis::CtrlLeftClick => global.mouse_click.ctrlleft.action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlwaysOpenAction, RuleAction};

    fn prefs_with_global(action: IsolationAction) -> Preferences {
        let mut prefs = Preferences::default();
        prefs.global.navigation.action = action;
        prefs
    }

    #[test]
    fn test_never_isolates_nothing() {
        let action = IsolationAction::Never;
        assert!(!action.isolates("https://example.com", "https://example.com/x"));
        assert!(!action.isolates("https://example.com", "https://sub.example.com"));
        assert!(!action.isolates("https://example.com", "https://other.org"));
    }

    #[test]
    fn test_always_isolates_everything() {
        let action = IsolationAction::Always;
        assert!(action.isolates("https://example.com", "https://example.com/x"));
        assert!(action.isolates("https://example.com", "https://sub.example.com"));
        assert!(action.isolates("https://example.com", "https://other.org"));
        assert!(action.isolates("about:blank", "https://other.org"));
    }

    #[test]
    fn test_not_same_domain() {
        let action = IsolationAction::NotSameDomain;
        assert!(!action.isolates("https://example.com", "https://example.com/x"));
        assert!(!action.isolates("https://example.com", "https://sub.example.com"));
        assert!(action.isolates("https://example.com", "https://other.org"));
        assert!(!action.isolates("about:blank", "https://other.org"));
    }

    #[test]
    fn test_not_same_domain_exact() {
        let action = IsolationAction::NotSameDomainExact;
        assert!(!action.isolates("https://example.com", "https://example.com/x"));
        assert!(action.isolates("https://example.com", "https://sub.example.com"));
        assert!(action.isolates("https://example.com", "https://other.org"));
        assert!(!action.isolates("about:newtab", "https://other.org"));
    }

    #[test]
    fn test_resolve_falls_back_to_global() {
        let mut prefs = prefs_with_global(IsolationAction::NotSameDomain);
        prefs.global.mouse_click.middle.action = IsolationAction::Always;
        let resolver = RuleResolver::new(&prefs);

        assert_eq!(
            resolver.resolve_action(Axis::Navigation, "https://example.com"),
            IsolationAction::NotSameDomain
        );
        assert_eq!(
            resolver.resolve_action(Axis::MiddleClick, "https://example.com"),
            IsolationAction::Always
        );
        assert_eq!(
            resolver.resolve_action(Axis::LeftClick, "https://example.com"),
            IsolationAction::Never
        );
    }

    #[test]
    fn test_domain_rule_overrides_global() {
        let mut prefs = prefs_with_global(IsolationAction::Never);
        prefs.domain.push(
            DomainIsolationRule::new("*.example.com")
                .with_navigation(RuleAction::Always)
                .with_click(ClickKind::Left, RuleAction::NotSameDomainExact),
        );
        let resolver = RuleResolver::new(&prefs);

        assert_eq!(
            resolver.resolve_action(Axis::Navigation, "https://www.example.com"),
            IsolationAction::Always
        );
        assert_eq!(
            resolver.resolve_action(Axis::LeftClick, "https://www.example.com"),
            IsolationAction::NotSameDomainExact
        );
        // useGlobal on the matched rule
        assert_eq!(
            resolver.resolve_action(Axis::MiddleClick, "https://www.example.com"),
            IsolationAction::Never
        );
        // no rule matches
        assert_eq!(
            resolver.resolve_action(Axis::Navigation, "https://other.org"),
            IsolationAction::Never
        );
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let mut prefs = Preferences::default();
        prefs.domain.push(DomainIsolationRule::new("*.example.com").with_navigation(RuleAction::Never));
        prefs.domain.push(DomainIsolationRule::new("www.example.com").with_navigation(RuleAction::Always));
        let resolver = RuleResolver::new(&prefs);

        assert_eq!(
            resolver.resolve_action(Axis::Navigation, "https://www.example.com"),
            IsolationAction::Never
        );
        assert_eq!(
            resolver.select_rule("https://www.example.com").map(|r| r.pattern.as_str()),
            Some("*.example.com")
        );
    }

    #[test]
    fn test_global_exclusions() {
        let mut prefs = prefs_with_global(IsolationAction::Always);
        prefs.global.excluded.push("*.bank.com".to_string());
        prefs.global.excluded_containers.insert("work".to_string());
        let resolver = RuleResolver::new(&prefs);

        assert!(resolver.is_excluded(Axis::Navigation, "https://login.bank.com", "personal"));
        assert!(resolver.is_excluded(Axis::Navigation, "https://news.org", "work"));
        assert!(!resolver.is_excluded(Axis::Navigation, "https://news.org", "personal"));
    }

    #[test]
    fn test_rule_exclusions_replace_global() {
        let mut prefs = prefs_with_global(IsolationAction::Always);
        prefs.global.excluded.push("cdn.example.com".to_string());
        prefs.domain.push(
            DomainIsolationRule::new("*.example.com")
                .with_excluded("static.example.com")
                .with_excluded_container("c-1"),
        );
        let resolver = RuleResolver::new(&prefs);

        assert!(resolver.is_excluded(Axis::Navigation, "https://static.example.com", "c-0"));
        assert!(!resolver.is_excluded(Axis::Navigation, "https://cdn.example.com", "c-0"));
        assert!(resolver.is_excluded(Axis::LeftClick, "https://www.example.com", "c-1"));
    }

    #[test]
    fn test_evaluate_exclusion_only_suppresses() {
        let mut prefs = prefs_with_global(IsolationAction::Always);
        prefs.global.excluded.push("other.org".to_string());
        let resolver = RuleResolver::new(&prefs);

        let outcome = resolver.evaluate(Axis::Navigation, "https://a.com", "https://other.org", "c");
        assert!(outcome.isolates);
        assert!(outcome.excluded);
        assert!(!outcome.should_isolate());

        let outcome = resolver.evaluate(Axis::Navigation, "https://a.com", "https://b.org", "c");
        assert!(outcome.should_isolate());

        // Exclusions never force isolation
        let prefs = prefs_with_global(IsolationAction::Never);
        let resolver = RuleResolver::new(&prefs);
        let outcome = resolver.evaluate(Axis::Navigation, "https://a.com", "https://other.org", "c");
        assert!(!outcome.isolates);
        assert!(!outcome.excluded);
    }

    #[test]
    fn test_always_open_and_click_kind() {
        let mut prefs = Preferences::default();
        prefs.global.mouse_click.middle.target_container_kind = TargetContainerKind::DeletesHistory;
        prefs.domain.push(DomainIsolationRule::new("mail.example.com").with_always_open(
            AlwaysOpenIsolated {
                action: AlwaysOpenAction::Always,
                ..Default::default()
            },
        ));
        let resolver = RuleResolver::new(&prefs);

        let always = resolver.always_open("https://mail.example.com/inbox").unwrap();
        assert_eq!(always.action, AlwaysOpenAction::Always);
        assert!(resolver.always_open("https://example.com").is_none());

        assert_eq!(
            resolver.click_target_kind(ClickKind::Middle),
            TargetContainerKind::DeletesHistory
        );
        assert_eq!(resolver.click_target_kind(ClickKind::Left), TargetContainerKind::Default);
    }

    #[test]
    fn test_ignored_domains() {
        let prefs = Preferences::default();
        let resolver = RuleResolver::new(&prefs);
        assert!(resolver.is_ignored("https://addons.mozilla.org/en-US/firefox/"));
        assert!(!resolver.is_ignored("https://mozilla.org"));
    }

    #[test]
    fn test_axis_from_click_kind() {
        assert_eq!(Axis::from(ClickKind::Left), Axis::LeftClick);
        assert_eq!(Axis::from(ClickKind::Middle), Axis::MiddleClick);
        assert_eq!(Axis::from(ClickKind::CtrlLeft), Axis::CtrlLeftClick);
        assert_eq!(Axis::CtrlLeftClick.to_string(), "ctrl-left-click");
    }
}
