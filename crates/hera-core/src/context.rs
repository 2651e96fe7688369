//! Correlation types.
//!
//! [`RequestId`] identifies a request across the gateway, its logs, and the
//! business backend. [`ErrorContext`] is the correlation block embedded in
//! every error envelope.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum accepted length of a client-supplied request id.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Opaque correlation identifier echoed as `X-Request-ID`.
///
/// Generated ids are UUID v7, which are time-ordered and therefore sort
/// naturally in log stores. Clients may supply their own id as long as it
/// only uses `[A-Za-z0-9._-]`.
///
/// # Example
///
/// ```
/// use hera_core::RequestId;
///
/// let generated = RequestId::new();
/// assert_eq!(generated.as_str().len(), 36);
///
/// let supplied = RequestId::from_header("client-abc.1").unwrap();
/// assert_eq!(supplied.as_str(), "client-abc.1");
/// assert!(RequestId::from_header("bad id with spaces").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Accepts a client-supplied id if it is non-empty, at most 128 bytes,
    /// and uses only safe characters.
    #[must_use]
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        let valid = !value.is_empty()
            && value.len() <= MAX_REQUEST_ID_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        valid.then(|| Self(value.to_string()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

/// Correlation block of the error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Request correlation id.
    pub request_id: String,
    /// Resolved actor, if authentication got that far.
    pub actor_id: Option<String>,
    /// Bound organization, if org binding got that far.
    pub organization_id: Option<String>,
    /// Request path.
    pub endpoint: String,
    /// RFC 3339 timestamp of the failure.
    pub timestamp: String,
}

impl ErrorContext {
    /// Creates a context stamped with the current time.
    #[must_use]
    pub fn new(request_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            actor_id: None,
            organization_id: None,
            endpoint: endpoint.into(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }

    /// Sets the actor id.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Sets the organization id.
    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }
}
