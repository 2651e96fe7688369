//! Request context built by the chain.
//!
//! [`MiddlewareContext`] is append-only: every field is set at most once,
//! by the stage that declared it. Once the chain succeeds it is frozen into
//! a [`RequestContext`], the only context handlers ever see.

use crate::idempotency::IdempotencyOutcome;
use crate::middleware::{ContextField, Enrichment};
use crate::rate_limit::RateLimitDecision;
use crate::types::Request;
use hera_core::{Actor, ErrorContext, GatewayError, OperationClass, OrgContext, RequestId};
use hera_guardrails::GuardrailResult;
use hera_router::{Params, RouteDefinition, RouteMatch};
use hera_telemetry::{LogContext, RequestAnnotation, RequestHandle};
use http::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Context accumulated while the chain runs.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    request_id: RequestId,
    log_handle: Option<RequestHandle>,
    method: Method,
    path: String,
    route: Arc<RouteDefinition>,
    params: Params,
    payload: Arc<Value>,
    started_at: Instant,
    actor: Option<Arc<Actor>>,
    org: Option<Arc<OrgContext>>,
    guardrails: Option<Arc<GuardrailResult>>,
    rate_limit: Option<RateLimitDecision>,
    idempotency: Option<Arc<IdempotencyOutcome>>,
    metadata: BTreeMap<String, Value>,
}

impl MiddlewareContext {
    /// Creates a context for a resolved route.
    #[must_use]
    pub fn new(
        request_id: RequestId,
        method: Method,
        path: impl Into<String>,
        route: &RouteMatch,
        payload: Value,
    ) -> Self {
        Self {
            request_id,
            log_handle: None,
            method,
            path: path.into(),
            route: Arc::clone(&route.route),
            params: route.params.clone(),
            payload: Arc::new(payload),
            started_at: Instant::now(),
            actor: None,
            org: None,
            guardrails: None,
            rate_limit: None,
            idempotency: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a context from a buffered request, parsing its body once.
    ///
    /// An empty body becomes `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns a 400 `INVALID_JSON` error if a non-empty body is not JSON.
    pub fn from_request(
        request_id: RequestId,
        request: &Request,
        route: &RouteMatch,
    ) -> Result<Self, GatewayError> {
        let body = request.body();
        let payload = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(body).map_err(|e| {
                GatewayError::validation("INVALID_JSON", format!("request body is not valid JSON: {e}"))
            })?
        };
        Ok(Self::new(
            request_id,
            request.method().clone(),
            request.uri().path(),
            route,
            payload,
        ))
    }

    /// Ties the context to the logger's record for this request.
    #[must_use]
    pub fn with_log_handle(mut self, handle: RequestHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    /// Merges a stage's enrichment.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the field, or a metadata key, is
    /// already set.
    pub fn apply(&mut self, enrichment: Enrichment) -> Result<(), GatewayError> {
        let field = enrichment.field();
        let occupied = match enrichment {
            Enrichment::Actor(actor) => set_once(&mut self.actor, Arc::new(actor)),
            Enrichment::OrgContext(org) => set_once(&mut self.org, Arc::new(org)),
            Enrichment::Guardrails(result) => set_once(&mut self.guardrails, Arc::new(result)),
            Enrichment::RateLimit(decision) => set_once(&mut self.rate_limit, decision),
            Enrichment::Idempotency(outcome) => set_once(&mut self.idempotency, Arc::new(outcome)),
            Enrichment::Metadata(entries) => {
                for (key, value) in entries {
                    if self.metadata.contains_key(&key) {
                        return Err(GatewayError::internal(format!(
                            "metadata key `{key}` is already set"
                        )));
                    }
                    self.metadata.insert(key, value);
                }
                false
            }
        };
        if occupied {
            return Err(GatewayError::internal(format!(
                "context field `{field}` is already set"
            )));
        }
        Ok(())
    }

    /// Freezes the context for the handler.
    ///
    /// # Errors
    ///
    /// Returns a 500 internal error if the actor or org binding is
    /// missing: a chain that admits requests must set both.
    pub fn freeze(&self) -> Result<RequestContext, GatewayError> {
        let actor = self
            .actor
            .clone()
            .ok_or_else(|| missing_field(ContextField::Actor))?;
        let org = self
            .org
            .clone()
            .ok_or_else(|| missing_field(ContextField::OrgContext))?;
        Ok(RequestContext {
            chain: self.clone(),
            actor,
            org,
        })
    }

    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Returns the logger handle, if the request was started on one.
    #[must_use]
    pub fn log_handle(&self) -> Option<RequestHandle> {
        self.log_handle
    }

    /// Returns the request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the matched route.
    #[must_use]
    pub fn route(&self) -> &RouteDefinition {
        &self.route
    }

    /// Returns the extracted path parameters.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns the parsed body.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns the backend operation, falling back to the handler name.
    #[must_use]
    pub fn operation(&self) -> &str {
        self.route.rpc_action.as_deref().unwrap_or(&self.route.handler)
    }

    /// Returns the route's operation class.
    #[must_use]
    pub fn operation_class(&self) -> OperationClass {
        self.route.operation_class
    }

    /// Returns the time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the actor, once authenticated.
    #[must_use]
    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_deref()
    }

    /// Returns the org binding, once bound.
    #[must_use]
    pub fn org(&self) -> Option<&OrgContext> {
        self.org.as_deref()
    }

    /// Returns the guardrail result.
    #[must_use]
    pub fn guardrails(&self) -> Option<&GuardrailResult> {
        self.guardrails.as_deref()
    }

    /// Returns the rate-limit decision.
    #[must_use]
    pub fn rate_limit(&self) -> Option<&RateLimitDecision> {
        self.rate_limit.as_ref()
    }

    /// Returns the idempotency outcome.
    #[must_use]
    pub fn idempotency(&self) -> Option<&IdempotencyOutcome> {
        self.idempotency.as_deref()
    }

    /// Returns a metadata value.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Returns `true` if `field` has been set.
    #[must_use]
    pub fn is_set(&self, field: ContextField) -> bool {
        match field {
            ContextField::Actor => self.actor.is_some(),
            ContextField::OrgContext => self.org.is_some(),
            ContextField::Guardrails => self.guardrails.is_some(),
            ContextField::RateLimit => self.rate_limit.is_some(),
            ContextField::Idempotency => self.idempotency.is_some(),
            ContextField::Metadata => !self.metadata.is_empty(),
        }
    }

    /// Correlation fields for structured log entries.
    #[must_use]
    pub fn log_context(&self) -> LogContext {
        let mut context = LogContext::new(self.request_id.as_str()).with_endpoint(&self.path);
        if let Some(actor) = &self.actor {
            context = context.with_actor(&actor.id);
        }
        if let Some(org) = &self.org {
            context = context.with_organization(&org.organization_id);
        }
        context
    }

    /// Correlation block for error envelopes.
    #[must_use]
    pub fn error_context(&self) -> ErrorContext {
        let mut context = ErrorContext::new(self.request_id.as_str(), &self.path);
        if let Some(actor) = &self.actor {
            context = context.with_actor(&actor.id);
        }
        if let Some(org) = &self.org {
            context = context.with_organization(&org.organization_id);
        }
        context
    }

    /// Details for the logger's completion record.
    #[must_use]
    pub fn annotation(&self) -> RequestAnnotation {
        RequestAnnotation {
            actor_id: self.actor.as_ref().map(|a| a.id.clone()),
            organization_id: self.org.as_ref().map(|o| o.organization_id.clone()),
            operation: Some(self.operation().to_string()),
            operation_class: Some(self.operation_class().as_str().to_string()),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(path: &str) -> Self {
        let registry = hera_router::RouteRegistry::with_defaults().unwrap();
        let route = registry.match_route(&Method::POST, path);
        Self::new(RequestId::new(), Method::POST, path, &route, Value::Null)
    }

    #[cfg(test)]
    pub(crate) fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Arc::new(payload);
        self
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T) -> bool {
    if slot.is_some() {
        return true;
    }
    *slot = Some(value);
    false
}

fn missing_field(field: ContextField) -> GatewayError {
    GatewayError::internal(format!(
        "mandatory context field `{field}` missing after chain"
    ))
}

/// Immutable context handed to handlers.
///
/// The actor and org binding are guaranteed present.
#[derive(Debug, Clone)]
pub struct RequestContext {
    chain: MiddlewareContext,
    actor: Arc<Actor>,
    org: Arc<OrgContext>,
}

impl RequestContext {
    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.chain.request_id
    }

    /// Returns the resolved caller.
    #[must_use]
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Returns the bound tenant.
    #[must_use]
    pub fn org(&self) -> &OrgContext {
        &self.org
    }

    /// Returns the matched route.
    #[must_use]
    pub fn route(&self) -> &RouteDefinition {
        &self.chain.route
    }

    /// Returns the extracted path parameters.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.chain.params
    }

    /// Returns the parsed body.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.chain.payload
    }

    /// Returns the backend operation, falling back to the handler name.
    #[must_use]
    pub fn operation(&self) -> &str {
        self.chain.operation()
    }

    /// Returns the guardrail result, if the stage ran.
    #[must_use]
    pub fn guardrails(&self) -> Option<&GuardrailResult> {
        self.chain.guardrails()
    }

    /// Returns the rate-limit decision, if the stage ran.
    #[must_use]
    pub fn rate_limit(&self) -> Option<&RateLimitDecision> {
        self.chain.rate_limit()
    }

    /// Returns the idempotency outcome, if the stage ran.
    #[must_use]
    pub fn idempotency(&self) -> Option<&IdempotencyOutcome> {
        self.chain.idempotency()
    }

    /// Returns a metadata value.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.chain.metadata(key)
    }

    /// Returns the time since the request entered the chain.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.chain.elapsed()
    }

    /// Correlation fields for structured log entries.
    #[must_use]
    pub fn log_context(&self) -> LogContext {
        self.chain.log_context()
    }

    /// Correlation block for error envelopes.
    #[must_use]
    pub fn error_context(&self) -> ErrorContext {
        self.chain.error_context()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hera_core::Membership;
    use http::StatusCode;

    fn actor() -> Actor {
        Actor::new("user-1", "user@example.com").with_membership(Membership::new("org-A", ["member"]))
    }

    #[test]
    fn test_fields_are_set_once() {
        let mut ctx = MiddlewareContext::for_test("/api/v2/entities");
        ctx.apply(Enrichment::Actor(actor())).unwrap();
        assert!(ctx.is_set(ContextField::Actor));

        let err = ctx.apply(Enrichment::Actor(actor())).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message().contains("`actor`"));
    }

    #[test]
    fn test_metadata_is_append_only() {
        let mut ctx = MiddlewareContext::for_test("/api/v2/entities");
        ctx.apply(Enrichment::Metadata(vec![("channel".into(), "api".into())]))
            .unwrap();
        ctx.apply(Enrichment::Metadata(vec![("region".into(), "eu".into())]))
            .unwrap();
        assert_eq!(ctx.metadata("region"), Some(&Value::from("eu")));
        assert!(ctx
            .apply(Enrichment::Metadata(vec![("channel".into(), "batch".into())]))
            .is_err());
        assert_eq!(ctx.metadata("channel"), Some(&Value::from("api")));
    }

    #[test]
    fn test_freeze_requires_actor_and_org() {
        let mut ctx = MiddlewareContext::for_test("/api/v2/entities");
        let err = ctx.freeze().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message().contains("`actor`"));

        ctx.apply(Enrichment::Actor(actor())).unwrap();
        assert!(ctx.freeze().unwrap_err().message().contains("`org_context`"));

        let org = OrgContext::from_membership(&ctx.actor().unwrap().memberships[0]);
        ctx.apply(Enrichment::OrgContext(org)).unwrap();
        let frozen = ctx.freeze().unwrap();
        assert_eq!(frozen.actor().id, "user-1");
        assert_eq!(frozen.org().organization_id, "org-A");
        assert_eq!(frozen.operation(), "hera_entity_upsert_v2");
    }

    #[test]
    fn test_from_request_parses_body() {
        let registry = hera_router::RouteRegistry::with_defaults().unwrap();
        let route = registry.match_route(&Method::POST, "/api/v2/entities");

        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/api/v2/entities")
            .body(bytes::Bytes::from_static(br#"{"organization_id":"org-A"}"#))
            .unwrap();
        let ctx = MiddlewareContext::from_request(RequestId::new(), &request, &route).unwrap();
        assert_eq!(ctx.payload()["organization_id"], "org-A");
        assert_eq!(ctx.operation_class(), OperationClass::Write);

        let empty = http::Request::builder()
            .method(Method::POST)
            .uri("/api/v2/entities")
            .body(bytes::Bytes::new())
            .unwrap();
        let ctx = MiddlewareContext::from_request(RequestId::new(), &empty, &route).unwrap();
        assert!(ctx.payload().is_null());

        let broken = http::Request::builder()
            .method(Method::POST)
            .uri("/api/v2/entities")
            .body(bytes::Bytes::from_static(b"{nope"))
            .unwrap();
        let err = MiddlewareContext::from_request(RequestId::new(), &broken, &route).unwrap_err();
        assert_eq!(err.code(), "INVALID_JSON");
    }

    #[test]
    fn test_log_context_tracks_bindings() {
        let mut ctx = MiddlewareContext::for_test("/api/v2/entities");
        assert_eq!(ctx.log_context().actor_id, None);
        ctx.apply(Enrichment::Actor(actor())).unwrap();
        assert_eq!(ctx.log_context().actor_id.as_deref(), Some("user-1"));
        assert_eq!(ctx.error_context().actor_id.as_deref(), Some("user-1"));
    }
}
