//! Registration errors.

use thiserror::Error;

/// Errors raised while building the route table.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A different definition is already registered for the same key.
    #[error("conflicting registration for {method} {pattern}")]
    Conflict {
        /// HTTP method.
        method: String,
        /// Path pattern.
        pattern: String,
    },

    /// The pattern could not be compiled.
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Path pattern.
        pattern: String,
        /// Why compilation failed.
        reason: String,
    },
}

impl RegistryError {
    /// Creates an invalid-pattern error.
    #[must_use]
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}
