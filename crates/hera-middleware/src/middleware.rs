//! Core middleware trait and the enrichments stages produce.

use crate::context::{MiddlewareContext, RequestContext};
use crate::idempotency::IdempotencyOutcome;
use crate::rate_limit::RateLimitDecision;
use crate::types::{Request, Response};
use hera_core::{Actor, GatewayError, OrgContext};
use hera_guardrails::GuardrailResult;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// A boxed future that is `Send` and has a lifetime.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The context field a stage is allowed to write.
///
/// Failures are attributed to the stage and field in logs, and the executor
/// rejects an enrichment aimed at any other field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextField {
    /// The resolved caller.
    Actor,
    /// The bound tenant.
    OrgContext,
    /// The guardrail pass.
    Guardrails,
    /// The rate-limit decision.
    RateLimit,
    /// The idempotency outcome.
    Idempotency,
    /// Free-form key/value annotations.
    Metadata,
}

impl ContextField {
    /// Returns the field name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Actor => "actor",
            Self::OrgContext => "org_context",
            Self::Guardrails => "guardrails",
            Self::RateLimit => "rate_limit",
            Self::Idempotency => "idempotency",
            Self::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for ContextField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful stage contributes to the context.
#[derive(Debug, Clone)]
pub enum Enrichment {
    /// Sets the actor.
    Actor(Actor),
    /// Sets the org binding.
    OrgContext(OrgContext),
    /// Sets the guardrail result.
    Guardrails(GuardrailResult),
    /// Sets the rate-limit decision.
    RateLimit(RateLimitDecision),
    /// Sets the idempotency outcome.
    Idempotency(IdempotencyOutcome),
    /// Adds metadata entries. Existing keys cannot be replaced.
    Metadata(Vec<(String, Value)>),
}

impl Enrichment {
    /// Returns the field this enrichment writes.
    #[must_use]
    pub const fn field(&self) -> ContextField {
        match self {
            Self::Actor(_) => ContextField::Actor,
            Self::OrgContext(_) => ContextField::OrgContext,
            Self::Guardrails(_) => ContextField::Guardrails,
            Self::RateLimit(_) => ContextField::RateLimit,
            Self::Idempotency(_) => ContextField::Idempotency,
            Self::Metadata(_) => ContextField::Metadata,
        }
    }
}

/// One stage of the admission chain.
///
/// Stages read the context built so far and either return an
/// [`Enrichment`] for their declared field or a [`GatewayError`] that stops
/// the chain.
///
/// # Example
///
/// ```rust
/// use hera_middleware::{BoxFuture, ContextField, Enrichment, Middleware, MiddlewareContext, Request};
/// use hera_core::GatewayError;
///
/// struct Tagger;
///
/// impl Middleware for Tagger {
///     fn name(&self) -> &'static str {
///         "tagger"
///     }
///
///     fn context_field(&self) -> ContextField {
///         ContextField::Metadata
///     }
///
///     fn process<'a>(
///         &'a self,
///         _ctx: &'a MiddlewareContext,
///         _request: &'a Request,
///     ) -> BoxFuture<'a, Result<Enrichment, GatewayError>> {
///         Box::pin(async move {
///             Ok(Enrichment::Metadata(vec![("channel".into(), "api".into())]))
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this stage.
    fn name(&self) -> &'static str;

    /// Returns the field this stage writes.
    fn context_field(&self) -> ContextField;

    /// Runs the stage.
    fn process<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Enrichment, GatewayError>>;

    /// Returns a response that replaces the handler call, if any.
    ///
    /// Called once the whole chain has succeeded.
    fn respond(&self, _ctx: &RequestContext) -> Option<Response> {
        None
    }

    /// Runs after a response exists, for every stage that completed.
    ///
    /// Hooks run in reverse stage order, also when a later stage or the
    /// handler failed.
    fn after<'a>(
        &'a self,
        _ctx: &'a MiddlewareContext,
        _response: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Terminal handler invoked once the chain admits a request.
pub trait Handler: Send + Sync + 'static {
    /// Handles an admitted request.
    fn call<'a>(
        &'a self,
        ctx: &'a RequestContext,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, GatewayError>>;
}

/// A middleware created from a synchronous function.
///
/// # Example
///
/// ```rust
/// use hera_middleware::{ContextField, Enrichment, FnMiddleware};
///
/// let stage = FnMiddleware::new("channel", ContextField::Metadata, |_ctx, _req| {
///     Ok(Enrichment::Metadata(vec![("channel".into(), "api".into())]))
/// });
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    field: ContextField,
    func: F,
}

impl<F> FnMiddleware<F>
where
    F: Fn(&MiddlewareContext, &Request) -> Result<Enrichment, GatewayError> + Send + Sync + 'static,
{
    /// Creates a new function-based middleware.
    pub fn new(name: &'static str, field: ContextField, func: F) -> Self {
        Self { name, field, func }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&MiddlewareContext, &Request) -> Result<Enrichment, GatewayError> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn context_field(&self) -> ContextField {
        self.field
    }

    fn process<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Enrichment, GatewayError>> {
        let result = (self.func)(ctx, request);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enrichment_fields() {
        assert_eq!(
            Enrichment::Actor(Actor::new("u", "u@example.com")).field(),
            ContextField::Actor
        );
        assert_eq!(
            Enrichment::Metadata(Vec::new()).field(),
            ContextField::Metadata
        );
        assert_eq!(ContextField::OrgContext.to_string(), "org_context");
    }

    #[tokio::test]
    async fn test_fn_middleware() {
        let stage = FnMiddleware::new("fails", ContextField::Actor, |_ctx, _req| {
            Err(GatewayError::authentication("AUTH_REQUIRED", "no token"))
        });
        assert_eq!(stage.name(), "fails");
        assert_eq!(stage.context_field(), ContextField::Actor);

        let ctx = MiddlewareContext::for_test("/api/v2/entities");
        let request = Request::new(bytes::Bytes::new());
        let err = stage.process(&ctx, &request).await.unwrap_err();
        assert_eq!(err.code(), "AUTH_REQUIRED");
    }
}
