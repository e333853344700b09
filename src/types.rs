//! Core event and snapshot types for the isolation engine
//!
//! All types use camelCase JSON serialization so collaborators can hand
//! them over from the browser side unchanged.

use serde::{Deserialize, Serialize};

/// Kind of browsing context a tab lives in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainerKind {
    /// Disposable context created by isolation
    Isolated,
    /// Long-lived context, including the browser default
    #[default]
    Permanent,
}

/// Snapshot of a tab at the moment an event was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    /// Browser-assigned tab id
    pub id: u64,

    /// URL currently loaded in the tab
    pub url: String,

    /// Container (cookie store) id the tab belongs to
    pub container_id: String,

    /// Whether the container is isolated or permanent
    #[serde(default)]
    pub container_kind: ContainerKind,

    /// Tab that opened this one, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener_tab_id: Option<u64>,
}

impl TabSnapshot {
    /// Snapshot of a tab in a permanent container
    pub fn new(id: u64, url: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            container_id: container_id.into(),
            container_kind: ContainerKind::Permanent,
            opener_tab_id: None,
        }
    }

    /// Snapshot of a tab in an isolated container
    pub fn isolated(id: u64, url: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            container_kind: ContainerKind::Isolated,
            ..Self::new(id, url, container_id)
        }
    }

    /// Set the opener tab id
    pub fn with_opener(mut self, opener_tab_id: u64) -> Self {
        self.opener_tab_id = Some(opener_tab_id);
        self
    }

    pub fn is_isolated(&self) -> bool {
        self.container_kind == ContainerKind::Isolated
    }
}

/// A network request that starts or continues a navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationRequest {
    /// Destination URL
    pub url: String,

    /// HTTP method (e.g., "GET", "POST")
    #[serde(default = "default_method")]
    pub method: String,

    /// URL of the document that issued the request, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,

    /// Position in the redirect chain (0 = initial request)
    #[serde(default)]
    pub redirect_position: u32,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

impl NavigationRequest {
    /// Create a GET request observed now
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            origin_url: None,
            redirect_position: 0,
            timestamp: now_millis(),
        }
    }

    /// Set the HTTP method
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set the issuing document URL
    pub fn with_origin_url(mut self, origin_url: impl Into<String>) -> Self {
        self.origin_url = Some(origin_url.into());
        self
    }

    /// Mark the request as the n-th hop of a redirect chain
    pub fn redirected(mut self, position: u32) -> Self {
        self.redirect_position = position;
        self
    }

    /// Override the observation timestamp
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_redirect(&self) -> bool {
        self.redirect_position > 0
    }

    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }
}

/// Mouse button combination that produced a click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClickKind {
    Left,
    Middle,
    CtrlLeft,
}

/// A click on a link observed in a tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    /// Button combination
    pub kind: ClickKind,

    /// Link destination
    pub url: String,

    /// Tab the click happened in
    pub tab: TabSnapshot,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl ClickEvent {
    /// Create a click observed now
    pub fn new(kind: ClickKind, url: impl Into<String>, tab: TabSnapshot) -> Self {
        Self {
            kind,
            url: url.into(),
            tab,
            timestamp: now_millis(),
        }
    }

    /// Override the observation timestamp
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Answer from the external container-assignment capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Container the destination is bound to
    pub owner_container_id: String,

    /// Whether the user asked never to be prompted for this binding
    #[serde(default)]
    pub never_ask: bool,
}

/// Process-wide isolation switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolationActiveState {
    pub active: bool,

    /// Absolute time of the pending automatic reactivation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactivate_at_epoch_ms: Option<u64>,
}

impl Default for IsolationActiveState {
    fn default() -> Self {
        Self {
            active: true,
            reactivate_at_epoch_ms: None,
        }
    }
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_snapshot_constructors() {
        let tab = TabSnapshot::new(7, "https://example.com", "firefox-default");
        assert_eq!(tab.container_kind, ContainerKind::Permanent);
        assert!(!tab.is_isolated());
        assert!(tab.opener_tab_id.is_none());

        let tab = TabSnapshot::isolated(8, "https://example.com", "firefox-container-12")
            .with_opener(7);
        assert!(tab.is_isolated());
        assert_eq!(tab.opener_tab_id, Some(7));
    }

    #[test]
    fn test_navigation_request_builders() {
        let req = NavigationRequest::new("https://example.com/login")
            .with_method("post")
            .with_origin_url("https://example.com")
            .redirected(2)
            .at(1_700_000_000_000);

        assert!(req.is_post());
        assert!(req.is_redirect());
        assert_eq!(req.redirect_position, 2);
        assert_eq!(req.timestamp, 1_700_000_000_000);
        assert_eq!(req.origin_url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_navigation_request_wire_defaults() {
        let json = r#"{"url": "https://example.com", "timestamp": 42}"#;
        let req: NavigationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.redirect_position, 0);
        assert!(req.origin_url.is_none());
    }

    #[test]
    fn test_tab_snapshot_serialization() {
        let tab = TabSnapshot::isolated(3, "https://a.com", "c-1");
        let json = serde_json::to_string(&tab).unwrap();
        assert!(json.contains("\"containerId\":\"c-1\""));
        assert!(json.contains("\"containerKind\":\"isolated\""));
        assert!(!json.contains("openerTabId"));
    }

    #[test]
    fn test_click_kind_serialization() {
        assert_eq!(serde_json::to_string(&ClickKind::CtrlLeft).unwrap(), "\"ctrlLeft\"");
        let kind: ClickKind = serde_json::from_str("\"middle\"").unwrap();
        assert_eq!(kind, ClickKind::Middle);
    }

    #[test]
    fn test_active_state_default() {
        let state = IsolationActiveState::default();
        assert!(state.active);
        assert!(state.reactivate_at_epoch_ms.is_none());

        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("reactivateAtEpochMs"));
    }
}
