//! What a guardrail pass inspects.

use hera_core::{Actor, OperationClass, OrgContext};
use http::Method;
use serde_json::Value;

/// The bound identity, tenant, operation, and payload of one request.
#[derive(Debug, Clone, Copy)]
pub struct GuardrailInput<'a> {
    /// Resolved caller.
    pub actor: &'a Actor,
    /// Bound tenant.
    pub org: &'a OrgContext,
    /// HTTP method.
    pub method: &'a Method,
    /// Request path.
    pub path: &'a str,
    /// Backend operation name, or the handler name for routes without one.
    pub operation: &'a str,
    /// Operation class of the route.
    pub operation_class: OperationClass,
    /// Parsed JSON body, `Value::Null` when absent.
    pub payload: &'a Value,
}

impl GuardrailInput<'_> {
    /// Returns true if the method carries a body that creates or replaces data.
    #[must_use]
    pub fn is_body_write(&self) -> bool {
        matches!(*self.method, Method::POST | Method::PUT | Method::PATCH)
    }
}
