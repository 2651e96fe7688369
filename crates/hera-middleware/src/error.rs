//! Error types for chain assembly, counter stores, and the identity
//! collaborator.

use hera_core::GatewayError;
use thiserror::Error;

/// Errors raised while assembling a pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A stage writes a field that belongs before an earlier stage's field.
    #[error("stage `{stage}` writes `{field}` after `{previous}`")]
    OutOfOrder {
        /// Offending stage.
        stage: &'static str,
        /// Field it writes.
        field: &'static str,
        /// Field of the stage before it.
        previous: &'static str,
    },

    /// Two stages write the same field.
    #[error("stages `{first}` and `{second}` both write `{field}`")]
    DuplicateField {
        /// Field written twice.
        field: &'static str,
        /// First stage.
        first: &'static str,
        /// Second stage.
        second: &'static str,
    },
}

/// Failure of a key-addressed store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store cannot be reached.
    #[error("store `{store}` unavailable: {message}")]
    Unavailable {
        /// Store name.
        store: String,
        /// Error message.
        message: String,
    },

    /// The operation did not finish in time.
    #[error("store `{store}` timed out after {timeout_ms}ms")]
    Timeout {
        /// Store name.
        store: String,
        /// Elapsed budget.
        timeout_ms: u64,
    },
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Returns the store name.
    #[must_use]
    pub fn store(&self) -> &str {
        match self {
            Self::Unavailable { store, .. } | Self::Timeout { store, .. } => store,
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        Self::unavailable(err.store().to_string(), err.to_string())
    }
}

/// Failure reported by the identity collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The token was rejected.
    #[error("invalid token: {reason}")]
    InvalidToken {
        /// Why the token was rejected.
        reason: String,
    },

    /// The subject has no actor record.
    #[error("actor not found: {subject}")]
    ActorNotFound {
        /// Verified subject.
        subject: String,
    },

    /// The collaborator failed.
    #[error("identity service unavailable: {message}")]
    Unavailable {
        /// Error message.
        message: String,
    },
}

impl IdentityError {
    /// Creates an invalid-token error.
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken {
            reason: reason.into(),
        }
    }

    /// Creates an actor-not-found error.
    pub fn actor_not_found(subject: impl Into<String>) -> Self {
        Self::ActorNotFound {
            subject: subject.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

impl From<IdentityError> for GatewayError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidToken { reason } => {
                Self::authentication("AUTH_TOKEN_INVALID", format!("Invalid token: {reason}"))
            }
            IdentityError::ActorNotFound { .. } => {
                Self::authentication("ACTOR_NOT_FOUND", "No actor is registered for this token")
            }
            IdentityError::Unavailable { message } => Self::unavailable("identity", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_identity_error_mapping() {
        let err: GatewayError = IdentityError::invalid_token("expired").into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), "AUTH_TOKEN_INVALID");

        let err: GatewayError = IdentityError::unavailable("connection refused").into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_store_error_maps_to_unavailable() {
        let err: GatewayError = StoreError::unavailable("rate_limit", "redis down").into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
