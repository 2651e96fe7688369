//! Server and collaborator error types.

use hera_core::GatewayError;
use hera_guardrails::GuardrailError;
use hera_middleware::PipelineError;
use hera_router::RegistryError;
use thiserror::Error;

/// Errors raised while assembling or running the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {message}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Error message.
        message: String,
    },

    /// The route table could not be built.
    #[error("route registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The admission chain could not be built.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// The guardrail settings are invalid.
    #[error("guardrails error: {0}")]
    Guardrails(#[from] GuardrailError),

    /// A collaborator client could not be built.
    #[error("collaborator `{service}` misconfigured: {message}")]
    Collaborator {
        /// Collaborator name.
        service: String,
        /// Error message.
        message: String,
    },

    /// I/O failure on the listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bind {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Creates a collaborator configuration error.
    pub fn collaborator(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by the business-operation collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusinessError {
    /// The operation ran and refused the request.
    #[error("operation rejected [{code}]: {message}")]
    Rejected {
        /// Error code chosen by the backend.
        code: String,
        /// Error message.
        message: String,
    },

    /// The backend could not be reached.
    #[error("business service unavailable: {message}")]
    Unavailable {
        /// Error message.
        message: String,
    },

    /// The backend answered with something that is not a valid response.
    #[error("invalid response from business service: {message}")]
    InvalidResponse {
        /// Error message.
        message: String,
    },
}

impl BusinessError {
    /// Creates a rejection.
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

impl From<BusinessError> for GatewayError {
    fn from(err: BusinessError) -> Self {
        match err {
            BusinessError::Rejected { code, message } => Self::business(code, message),
            BusinessError::Unavailable { message } => Self::unavailable("business", message),
            BusinessError::InvalidResponse { message } => Self::external("business", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_business_error_mapping() {
        let err: GatewayError = BusinessError::rejected("ENTITY_EXISTS", "duplicate code").into();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "ENTITY_EXISTS");
        assert!(!err.is_retryable());

        let err: GatewayError = BusinessError::unavailable("connection refused").into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.is_retryable());

        let err: GatewayError = BusinessError::invalid_response("not json").into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::bind("0.0.0.0:80", "permission denied");
        assert_eq!(err.to_string(), "failed to bind 0.0.0.0:80: permission denied");
    }
}
