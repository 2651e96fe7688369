//! Error types for the HERA gateway.
//!
//! [`GatewayError`] is the typed failure every pipeline stage, the admission
//! filter, and the dispatcher return. Each variant belongs to exactly one
//! [`ErrorCategory`], and each category carries a fixed severity and
//! retryability flag:
//!
//! | Category | Severity | Retryable | Status |
//! |---|---|---|---|
//! | `AUTHENTICATION` | HIGH | no | 401 |
//! | `AUTHORIZATION` | HIGH | no | 403 |
//! | `VALIDATION` | MEDIUM | no | 400 |
//! | `RATE_LIMIT` | MEDIUM | yes | 429 |
//! | `IDEMPOTENCY` | LOW | yes | 409 |
//! | `BUSINESS_LOGIC` | MEDIUM | no | 422 |
//! | `EXTERNAL_SERVICE` | HIGH | yes | 502 / 503 / 504 |
//! | `NOT_FOUND` | LOW | no | 404 / 410 |
//! | `METHOD_NOT_ALLOWED` | LOW | no | 405 |
//! | `INTERNAL` | CRITICAL | yes | 500 |
//!
//! Admission filter rejections map their risk level onto a category:
//! CRITICAL is reported as `AUTHORIZATION` (403), HIGH as `RATE_LIMIT` (429),
//! and anything lower as `VALIDATION` (400).

use crate::backoff;
use crate::context::ErrorContext;
use crate::tier::{RiskLevel, Severity};
use http::header::{HeaderName, HeaderValue, ALLOW, RETRY_AFTER};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`GatewayError`].
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Categories of errors for classification, logging, and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Missing or invalid credentials.
    Authentication,
    /// Authenticated caller lacks access (tenant fencing, permissions).
    Authorization,
    /// Guardrail or request-shape violations.
    Validation,
    /// Tenant budget exhausted.
    RateLimit,
    /// Duplicate request observed while the original is still running.
    Idempotency,
    /// Business rule rejected by the backend.
    BusinessLogic,
    /// Identity provider or business backend failed or timed out.
    ExternalService,
    /// Unregistered or retired route.
    NotFound,
    /// Registered path, unsupported method.
    MethodNotAllowed,
    /// Gateway bug or contract violation.
    Internal,
}

impl ErrorCategory {
    /// Returns all categories.
    #[must_use]
    pub const fn all() -> [Self; 10] {
        [
            Self::Authentication,
            Self::Authorization,
            Self::Validation,
            Self::RateLimit,
            Self::Idempotency,
            Self::BusinessLogic,
            Self::ExternalService,
            Self::NotFound,
            Self::MethodNotAllowed,
            Self::Internal,
        ]
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "AUTHENTICATION",
            Self::Authorization => "AUTHORIZATION",
            Self::Validation => "VALIDATION",
            Self::RateLimit => "RATE_LIMIT",
            Self::Idempotency => "IDEMPOTENCY",
            Self::BusinessLogic => "BUSINESS_LOGIC",
            Self::ExternalService => "EXTERNAL_SERVICE",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Returns the default HTTP status code for this error category.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            Self::Idempotency => StatusCode::CONFLICT,
            Self::BusinessLogic => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ExternalService => StatusCode::BAD_GATEWAY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the fixed severity of this category.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Authentication | Self::Authorization | Self::ExternalService => Severity::High,
            Self::Validation | Self::RateLimit | Self::BusinessLogic => Severity::Medium,
            Self::Idempotency | Self::NotFound | Self::MethodNotAllowed => Severity::Low,
            Self::Internal => Severity::Critical,
        }
    }

    /// Returns `true` if a client may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Idempotency | Self::ExternalService | Self::Internal
        )
    }

    /// Returns the suggested delay before retry attempt `attempt` (0-based).
    ///
    /// Non-retryable categories return `None`.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::RateLimit => Some(backoff::exponential(attempt, backoff::RATE_LIMIT_BASE)),
            Self::ExternalService => Some(backoff::exponential(attempt, backoff::EXTERNAL_BASE)),
            Self::Internal => Some(backoff::exponential(attempt, backoff::INTERNAL_BASE)),
            Self::Idempotency => Some(backoff::jittered_fixed(
                backoff::IDEMPOTENCY_DELAY,
                backoff::IDEMPOTENCY_JITTER,
            )),
            _ => None,
        }
    }

    /// Default remediation hints included in the error envelope.
    #[must_use]
    pub const fn default_suggestions(&self) -> &'static [&'static str] {
        match self {
            Self::Authentication => &[
                "Provide a valid bearer token in the Authorization header",
                "Refresh the token if it has expired",
            ],
            Self::Authorization => &[
                "Select an organization you are a member of with X-Organization-Id",
                "Ask an organization owner to grant the required permission",
            ],
            Self::Validation => &[
                "Fix every listed violation and resubmit the request",
                "Ensure organization_id in the payload matches the selected organization",
            ],
            Self::RateLimit => &["Wait for the Retry-After interval before retrying"],
            Self::Idempotency => &[
                "The original request is still being processed",
                "Retry shortly with the same idempotency key to receive its result",
            ],
            Self::BusinessLogic => &["Review the business rule reported by the backend"],
            Self::ExternalService => &["Retry with exponential backoff"],
            Self::NotFound => &["Check the endpoint path and API version"],
            Self::MethodNotAllowed => &["Use one of the methods listed in the Allow header"],
            Self::Internal => &["Retry later and report the request id if the problem persists"],
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error type for the gateway.
///
/// # Example
///
/// ```
/// use hera_core::{GatewayError, ErrorCategory};
///
/// fn require_token(token: Option<&str>) -> Result<&str, GatewayError> {
///     token.ok_or_else(|| GatewayError::authentication("MISSING_TOKEN", "Bearer token required"))
/// }
///
/// let err = require_token(None).unwrap_err();
/// assert_eq!(err.category(), ErrorCategory::Authentication);
/// assert_eq!(err.code(), "MISSING_TOKEN");
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Authentication failed.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Machine-readable code.
        code: String,
        /// Human-readable error message.
        message: String,
    },

    /// Authorization denied.
    #[error("Authorization denied: {message}")]
    Authorization {
        /// Machine-readable code.
        code: String,
        /// Human-readable error message.
        message: String,
    },

    /// Request rejected by guardrails or shape checks.
    #[error("Validation error: {message}")]
    Validation {
        /// Machine-readable code (first violation code for guardrail failures).
        code: String,
        /// Human-readable error message.
        message: String,
        /// Full violation list, never truncated.
        details: Option<serde_json::Value>,
    },

    /// Tenant rate limit exceeded.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Human-readable error message.
        message: String,
        /// Budget for the window.
        limit: u32,
        /// Unix time (seconds) at which the window resets.
        reset_at: u64,
        /// Seconds until a retry can succeed (always positive).
        retry_after_seconds: u64,
    },

    /// Duplicate of a request that is still in progress.
    #[error("Idempotency conflict: {message}")]
    IdempotencyConflict {
        /// Human-readable error message.
        message: String,
        /// The conflicting key.
        key: String,
    },

    /// Business rule rejection reported by the backend.
    #[error("Business rule violation: {message}")]
    BusinessLogic {
        /// Machine-readable code.
        code: String,
        /// Human-readable error message.
        message: String,
        /// Backend-supplied details.
        details: Option<serde_json::Value>,
    },

    /// Identity provider or business backend failure.
    #[error("External service error ({service}): {message}")]
    External {
        /// Machine-readable code.
        code: String,
        /// Human-readable error message.
        message: String,
        /// Name of the collaborator.
        service: String,
        /// 502, 503 or 504.
        status: StatusCode,
    },

    /// Unregistered route.
    #[error("Not found: {message}")]
    NotFound {
        /// Human-readable error message.
        message: String,
    },

    /// Route is registered but retired.
    #[error("Gone: {message}")]
    Deprecated {
        /// Human-readable error message.
        message: String,
    },

    /// Path is registered for other methods.
    #[error("Method not allowed: {message}")]
    MethodNotAllowed {
        /// Human-readable error message.
        message: String,
        /// Methods registered for the path.
        allowed: Vec<String>,
    },

    /// Rejected by the perimeter admission filter.
    #[error("Request rejected: {message}")]
    Admission {
        /// Machine-readable code naming the failed check.
        code: String,
        /// Human-readable error message.
        message: String,
        /// Risk level that selects the status code.
        risk: RiskLevel,
        /// Remaining block time, when the source is blocked.
        retry_after_seconds: Option<u64>,
    },

    /// Internal server error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl GatewayError {
    /// Creates an authentication error.
    #[must_use]
    pub fn authentication(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates an authorization error.
    #[must_use]
    pub fn authorization(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authorization {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error without details.
    #[must_use]
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Creates a validation error carrying structured details.
    #[must_use]
    pub fn validation_with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::Validation {
            code: code.into(),
            message: message.into(),
            details: Some(details),
        }
    }

    /// Creates a rate limited error.
    #[must_use]
    pub fn rate_limited(limit: u32, reset_at: u64, retry_after_seconds: u64) -> Self {
        Self::RateLimited {
            message: format!("Rate limit of {limit} requests exceeded"),
            limit,
            reset_at,
            retry_after_seconds: retry_after_seconds.max(1),
        }
    }

    /// Creates an idempotency conflict error.
    #[must_use]
    pub fn idempotency_conflict(key: impl Into<String>) -> Self {
        Self::IdempotencyConflict {
            message: "A request with this idempotency key is already in progress".to_string(),
            key: key.into(),
        }
    }

    /// Creates a business logic error.
    #[must_use]
    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BusinessLogic {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Creates a 502 external service error.
    #[must_use]
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            code: "UPSTREAM_ERROR".to_string(),
            message: message.into(),
            service: service.into(),
            status: StatusCode::BAD_GATEWAY,
        }
    }

    /// Creates a 503 error for an unreachable collaborator.
    #[must_use]
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            code: "UPSTREAM_UNAVAILABLE".to_string(),
            message: message.into(),
            service: service.into(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Creates a 504 error for a collaborator call that exceeded its timeout.
    #[must_use]
    pub fn upstream_timeout(service: impl Into<String>, timeout: Duration) -> Self {
        let service = service.into();
        Self::External {
            code: "UPSTREAM_TIMEOUT".to_string(),
            message: format!("{service} did not respond within {}ms", timeout.as_millis()),
            service,
            status: StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Creates a not found error for an unregistered route.
    #[must_use]
    pub fn route_not_found(method: &str, path: &str) -> Self {
        Self::NotFound {
            message: format!("No route registered for {method} {path}"),
        }
    }

    /// Creates a 410 error for a deprecated route.
    #[must_use]
    pub fn route_deprecated(method: &str, path: &str) -> Self {
        Self::Deprecated {
            message: format!("{method} {path} has been retired"),
        }
    }

    /// Creates a method not allowed error.
    #[must_use]
    pub fn method_not_allowed(method: &str, path: &str, allowed: Vec<String>) -> Self {
        Self::MethodNotAllowed {
            message: format!("{method} is not supported on {path}"),
            allowed,
        }
    }

    /// Creates an admission filter rejection.
    #[must_use]
    pub fn admission(
        code: impl Into<String>,
        message: impl Into<String>,
        risk: RiskLevel,
        retry_after_seconds: Option<u64>,
    ) -> Self {
        Self::Admission {
            code: code.into(),
            message: message.into(),
            risk,
            retry_after_seconds,
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Authorization { .. } => ErrorCategory::Authorization,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::IdempotencyConflict { .. } => ErrorCategory::Idempotency,
            Self::BusinessLogic { .. } => ErrorCategory::BusinessLogic,
            Self::External { .. } => ErrorCategory::ExternalService,
            Self::NotFound { .. } | Self::Deprecated { .. } => ErrorCategory::NotFound,
            Self::MethodNotAllowed { .. } => ErrorCategory::MethodNotAllowed,
            Self::Admission { risk, .. } => match risk {
                RiskLevel::Critical => ErrorCategory::Authorization,
                RiskLevel::High => ErrorCategory::RateLimit,
                _ => ErrorCategory::Validation,
            },
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::External { status, .. } => *status,
            Self::Deprecated { .. } => StatusCode::GONE,
            _ => self.category().default_status_code(),
        }
    }

    /// Returns the severity used for logging and alert tagging.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Admission { risk, .. } => *risk,
            _ => self.category().severity(),
        }
    }

    /// Returns `true` if the client may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Admission { risk, .. } => matches!(risk, RiskLevel::High),
            _ => self.category().is_retryable(),
        }
    }

    /// Returns the machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Authentication { code, .. }
            | Self::Authorization { code, .. }
            | Self::Validation { code, .. }
            | Self::BusinessLogic { code, .. }
            | Self::External { code, .. }
            | Self::Admission { code, .. } => code,
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            Self::NotFound { .. } => "ROUTE_NOT_FOUND",
            Self::Deprecated { .. } => "ROUTE_DEPRECATED",
            Self::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Returns the human-readable message without the category prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Authentication { message, .. }
            | Self::Authorization { message, .. }
            | Self::Validation { message, .. }
            | Self::RateLimited { message, .. }
            | Self::IdempotencyConflict { message, .. }
            | Self::BusinessLogic { message, .. }
            | Self::External { message, .. }
            | Self::NotFound { message }
            | Self::Deprecated { message }
            | Self::MethodNotAllowed { message, .. }
            | Self::Admission { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    /// Returns the server-mandated minimum wait, if any.
    #[must_use]
    pub const fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            Self::Admission {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            Self::IdempotencyConflict { .. } => Some(1),
            _ => None,
        }
    }

    /// Returns the suggested delay before retry attempt `attempt`.
    ///
    /// The category backoff is floored at the server-supplied `Retry-After`.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.is_retryable() {
            return None;
        }
        let computed = self
            .category()
            .retry_delay(attempt)
            .unwrap_or(Duration::ZERO);
        let floor = Duration::from_secs(self.retry_after_seconds().unwrap_or(0));
        Some(computed.max(floor))
    }

    /// Extra response headers that accompany this error.
    #[must_use]
    pub fn headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        let mut headers = Vec::new();
        if let Some(seconds) = self.retry_after_seconds() {
            headers.push((RETRY_AFTER, HeaderValue::from(seconds)));
        }
        match self {
            Self::RateLimited {
                limit, reset_at, ..
            } => {
                headers.push((
                    HeaderName::from_static("x-ratelimit-limit"),
                    HeaderValue::from(*limit),
                ));
                headers.push((
                    HeaderName::from_static("x-ratelimit-remaining"),
                    HeaderValue::from(0u32),
                ));
                headers.push((
                    HeaderName::from_static("x-ratelimit-reset"),
                    HeaderValue::from(*reset_at),
                ));
            }
            Self::MethodNotAllowed { allowed, .. } => {
                if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                    headers.push((ALLOW, value));
                }
            }
            _ => {}
        }
        headers
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { details, .. } | Self::BusinessLogic { details, .. } => {
                details.clone()
            }
            Self::RateLimited {
                limit,
                reset_at,
                retry_after_seconds,
                ..
            } => Some(serde_json::json!({
                "limit": limit,
                "remaining": 0,
                "reset_at": reset_at,
                "retry_after_seconds": retry_after_seconds,
            })),
            Self::IdempotencyConflict { key, .. } => {
                Some(serde_json::json!({ "idempotency_key": key }))
            }
            Self::External { service, .. } => Some(serde_json::json!({ "service": service })),
            Self::MethodNotAllowed { allowed, .. } => {
                Some(serde_json::json!({ "allowed_methods": allowed }))
            }
            Self::Admission { risk, .. } => Some(serde_json::json!({ "risk_level": risk })),
            _ => None,
        }
    }

    /// Converts this error to the serializable response envelope.
    ///
    /// Internal error messages are replaced by a generic message so that
    /// source chains never reach clients.
    #[must_use]
    pub fn to_envelope(&self, context: &ErrorContext) -> ErrorEnvelope {
        let category = self.category();
        let message = match self {
            Self::Internal { .. } => "An internal error occurred".to_string(),
            _ => self.message().to_string(),
        };
        ErrorEnvelope {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                category,
                severity: self.severity(),
                retryable: self.is_retryable(),
                suggestions: category
                    .default_suggestions()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                context: context.clone(),
                details: self.details(),
            },
        }
    }
}

/// Serializable error envelope for HTTP responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorDetail,
}

impl ErrorEnvelope {
    /// Serializes the envelope to JSON bytes.
    #[must_use]
    pub fn to_bytes(&self) -> bytes::Bytes {
        serde_json::to_vec(self)
            .map(bytes::Bytes::from)
            .unwrap_or_else(|_| bytes::Bytes::from_static(b"{\"error\":{\"code\":\"INTERNAL_ERROR\"}}"))
    }
}

/// Error detail within an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Severity of the failure.
    pub severity: Severity,
    /// Whether a retry may succeed.
    pub retryable: bool,
    /// Remediation hints.
    pub suggestions: Vec<String>,
    /// Correlation context.
    pub context: ErrorContext,
    /// Additional error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
