//! External container-assignment capability
//!
//! Another extension may bind domains to specific permanent containers.
//! The engine asks it through [`AssignmentOracle`] and never depends on how
//! the answer is transported. Failures are absorbed by the caller and read
//! as "no assignment".

use crate::domain::matches_pattern;
use crate::error::Result;
use crate::types::Assignment;
use async_trait::async_trait;
use std::sync::RwLock;

/// Capability answering whether a URL is bound to a container
#[async_trait]
pub trait AssignmentOracle: Send + Sync {
    /// Look up the assignment for `url`, `Ok(None)` if unassigned
    async fn query_assignment(&self, url: &str) -> Result<Option<Assignment>>;
}

/// Oracle that never assigns anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssignments;

#[async_trait]
impl AssignmentOracle for NoAssignments {
    async fn query_assignment(&self, _url: &str) -> Result<Option<Assignment>> {
        Ok(None)
    }
}

/// In-memory oracle keyed by domain pattern
///
/// Useful for tests and for embedding a static assignment table.
#[derive(Debug, Default)]
pub struct MemoryAssignmentOracle {
    assignments: RwLock<Vec<(String, Assignment)>>,
}

impl MemoryAssignmentOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind destinations matching `pattern` to `container_id`
    pub fn assign(&self, pattern: impl Into<String>, container_id: impl Into<String>) {
        let assignment = Assignment {
            owner_container_id: container_id.into(),
            never_ask: false,
        };
        self.assignments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((pattern.into(), assignment));
    }

    /// Remove every binding for `pattern`
    pub fn unassign(&self, pattern: &str) {
        self.assignments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(p, _)| p != pattern);
    }
}

#[async_trait]
impl AssignmentOracle for MemoryAssignmentOracle {
    async fn query_assignment(&self, url: &str) -> Result<Option<Assignment>> {
        let assignments = self.assignments.read().unwrap_or_else(|e| e.into_inner());
        Ok(assignments
            .iter()
            .find(|(pattern, _)| matches_pattern(url, pattern))
            .map(|(_, assignment)| assignment.clone()))
    }
}
