//! Error types for a3s-isolation
//!
//! Decision paths never surface these to callers; they are produced only
//! where a caller can act on them (loading preferences, validating rule
//! patterns) or by collaborators such as the assignment oracle, whose
//! failures the engine absorbs.

use thiserror::Error;

/// Errors that can occur around the isolation engine
#[derive(Debug, Error)]
pub enum IsolationError {
    /// Domain or exclusion pattern that cannot be compiled
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    /// URL or host that cannot be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// External assignment capability failure
    #[error("Assignment oracle error: {0}")]
    Oracle(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for isolation operations
pub type Result<T> = std::result::Result<T, IsolationError>;
