//! Route definitions.

use hera_core::{OperationClass, SecurityTier};
use http::Method;
use serde::Serialize;

/// An immutable route registered at process start.
///
/// # Example
///
/// ```rust
/// use hera_router::RouteDefinition;
/// use hera_core::{OperationClass, SecurityTier};
/// use http::Method;
///
/// let route = RouteDefinition::new(Method::POST, "/api/v2/transactions", "create_transaction")
///     .rpc("hera_txn_create_v2")
///     .permissions(["transactions:write"])
///     .tier(SecurityTier::Critical);
///
/// assert_eq!(route.operation_class, OperationClass::Finance);
/// assert!(route.participates_in_idempotency());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDefinition {
    /// HTTP method.
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    /// Path pattern, `:name` marks a parameter segment.
    pub pattern: String,
    /// Handler reference.
    pub handler: String,
    /// Backend RPC invoked by the handler.
    pub rpc_action: Option<String>,
    /// Class used for rate-limit budgets.
    pub operation_class: OperationClass,
    /// Permissions the bound org context must grant.
    pub required_permissions: Vec<String>,
    /// Security tier of the operation.
    pub security_tier: SecurityTier,
    /// Deprecated routes still match but are rejected with 410.
    pub deprecated: bool,
    /// Opts a non-mutating route into idempotent replay.
    pub idempotent: bool,
}

fn serialize_method<S: serde::Serializer>(method: &Method, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(method.as_str())
}

impl RouteDefinition {
    /// Creates a route whose operation class is derived from the method and
    /// path.
    #[must_use]
    pub fn new(method: Method, pattern: impl Into<String>, handler: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let operation_class = OperationClass::classify(&method, &pattern);
        let security_tier = match operation_class {
            OperationClass::Read => SecurityTier::Low,
            OperationClass::Write => SecurityTier::High,
            OperationClass::Finance => SecurityTier::Critical,
        };
        Self {
            method,
            pattern,
            handler: handler.into(),
            rpc_action: None,
            operation_class,
            required_permissions: Vec::new(),
            security_tier,
            deprecated: false,
            idempotent: false,
        }
    }

    /// Sets the backend RPC name.
    #[must_use]
    pub fn rpc(mut self, action: impl Into<String>) -> Self {
        self.rpc_action = Some(action.into());
        self
    }

    /// Overrides the derived operation class.
    #[must_use]
    pub fn class(mut self, class: OperationClass) -> Self {
        self.operation_class = class;
        self
    }

    /// Sets the required permissions.
    #[must_use]
    pub fn permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the security tier.
    #[must_use]
    pub fn tier(mut self, tier: SecurityTier) -> Self {
        self.security_tier = tier;
        self
    }

    /// Marks the route as deprecated.
    #[must_use]
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Flags the route for idempotent replay regardless of its class.
    #[must_use]
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Returns `true` if the pattern contains `:name` segments.
    #[must_use]
    pub fn is_parameterized(&self) -> bool {
        self.pattern.split('/').any(|s| s.starts_with(':'))
    }

    /// Returns `true` if requests to this route are deduplicated.
    #[must_use]
    pub fn participates_in_idempotency(&self) -> bool {
        self.idempotent || self.operation_class.is_mutating()
    }

    /// Returns `"METHOD pattern"`, used in logs.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{} {}", self.method, self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_class_and_tier() {
        let read = RouteDefinition::new(Method::GET, "/api/v2/entities", "list_entities");
        assert_eq!(read.operation_class, OperationClass::Read);
        assert_eq!(read.security_tier, SecurityTier::Low);
        assert!(!read.participates_in_idempotency());

        let write = RouteDefinition::new(Method::POST, "/api/v2/entities", "create_entity");
        assert_eq!(write.operation_class, OperationClass::Write);
        assert!(write.participates_in_idempotency());
    }

    #[test]
    fn test_explicit_flag() {
        let search = RouteDefinition::new(Method::POST, "/api/v2/entities/search", "search")
            .class(OperationClass::Read);
        assert!(!search.participates_in_idempotency());
        assert!(search.idempotent().participates_in_idempotency());
    }

    #[test]
    fn test_parameterized() {
        assert!(RouteDefinition::new(Method::GET, "/a/:id", "h").is_parameterized());
        assert!(!RouteDefinition::new(Method::GET, "/a/b", "h").is_parameterized());
    }
}
