//! The five admission stages.
//!
//! They run in this fixed order and each writes exactly one context field:
//!
//! 1. [`auth`] - bearer token to [`Actor`](hera_core::Actor)
//! 2. [`org_context`] - tenant selection and permission checks
//! 3. [`guardrails`] - the guardrail catalogue
//! 4. [`rate_limit`] - tenant budgets
//! 5. [`idempotency`] - deduplication and replay

pub mod auth;
pub mod guardrails;
pub mod idempotency;
pub mod org_context;
pub mod rate_limit;

pub use auth::{AuthStage, AUTHORIZATION_HEADER};
pub use guardrails::GuardrailsStage;
pub use idempotency::IdempotencyStage;
pub use org_context::{OrgContextStage, ORGANIZATION_HEADER};
pub use rate_limit::RateLimitStage;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::context::MiddlewareContext;
    use crate::middleware::Enrichment;
    use crate::types::Request;
    use bytes::Bytes;
    use hera_core::{Actor, Membership, OrgContext, RequestId};
    use hera_router::RouteRegistry;
    use hera_telemetry::{LoggerConfig, StructuredLogger};
    use http::Method;
    use serde_json::Value;
    use std::sync::Arc;

    pub(crate) fn logger() -> Arc<StructuredLogger> {
        Arc::new(StructuredLogger::new(LoggerConfig::development()))
    }

    pub(crate) fn actor() -> Actor {
        Actor::new("user-1", "user@example.com")
            .with_membership(
                Membership::new("org-A", ["member"])
                    .with_permissions(["entities:read", "entities:write"]),
            )
            .with_membership(Membership::new("org-B", ["viewer"]).with_permissions(["entities:read"]))
    }

    pub(crate) fn context(method: &Method, path: &str, payload: Value) -> MiddlewareContext {
        let registry = RouteRegistry::with_defaults().unwrap();
        let route = registry.match_route(method, path);
        MiddlewareContext::new(RequestId::new(), method.clone(), path, &route, payload)
    }

    pub(crate) fn bound_context(method: &Method, path: &str, org: &str, payload: Value) -> MiddlewareContext {
        let actor = actor();
        let membership = actor.active_membership(org).unwrap().clone();
        let mut ctx = context(method, path, payload);
        ctx.apply(Enrichment::Actor(actor)).unwrap();
        ctx.apply(Enrichment::OrgContext(OrgContext::from_membership(&membership)))
            .unwrap();
        ctx
    }

    pub(crate) fn request(method: &Method, path: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().method(method.clone()).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Bytes::new()).unwrap()
    }
}
