//! Guardrail errors.

use thiserror::Error;

/// Errors raised while constructing the engine.
#[derive(Debug, Error)]
pub enum GuardrailError {
    /// The configured smart-code pattern does not compile.
    #[error("invalid smart code pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// A rule that could not evaluate its input.
///
/// The engine converts it into a violation attributed to the rule.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RuleError {
    /// What went wrong.
    pub message: String,
}

impl RuleError {
    /// Creates a rule error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
