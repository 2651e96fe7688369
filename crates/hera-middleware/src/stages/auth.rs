//! Authentication stage.
//!
//! Extracts the bearer token, then verifies it and resolves the actor
//! through the [`IdentityResolver`], each call bounded by a timeout.
//! Resolved actors are served from the [`IdentityCache`] while fresh.

use crate::context::MiddlewareContext;
use crate::identity::{IdentityCache, IdentityResolver};
use crate::middleware::{BoxFuture, ContextField, Enrichment, Middleware};
use crate::types::Request;
use hera_core::{Actor, GatewayError, SecurityTier};
use hera_telemetry::StructuredLogger;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Authorization header for bearer tokens.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Resolves the caller of every request.
pub struct AuthStage {
    resolver: Arc<dyn IdentityResolver>,
    cache: Arc<IdentityCache>,
    timeout: Duration,
    logger: Arc<StructuredLogger>,
}

impl std::fmt::Debug for AuthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStage")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AuthStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn IdentityResolver>,
        cache: Arc<IdentityCache>,
        timeout: Duration,
        logger: Arc<StructuredLogger>,
    ) -> Self {
        Self {
            resolver,
            cache,
            timeout,
            logger,
        }
    }

    /// Returns the actor cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, crate::error::IdentityError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::upstream_timeout("identity", self.timeout)),
        }
    }

    async fn authenticate(&self, request: &Request) -> Result<Actor, GatewayError> {
        let token = bearer_token(request)?;

        if let Some(actor) = self.cache.get(token) {
            return Ok(Actor::clone(&actor));
        }

        let subject = self.bounded(self.resolver.verify_token(token)).await?;
        let actor = self.bounded(self.resolver.resolve_actor(&subject)).await?;
        debug!(actor_id = %actor.id, memberships = actor.memberships.len(), "actor resolved");
        self.cache.insert(token, Arc::new(actor.clone()));
        Ok(actor)
    }
}

fn bearer_token(request: &Request) -> Result<&str, GatewayError> {
    let value = request
        .headers()
        .get(AUTHORIZATION_HEADER)
        .ok_or_else(|| GatewayError::authentication("AUTH_REQUIRED", "Bearer token required"))?;
    let value = value.to_str().map_err(|_| {
        GatewayError::authentication("AUTH_TOKEN_MALFORMED", "Authorization header is not valid text")
    })?;
    let (scheme, token) = value.split_once(' ').ok_or_else(|| {
        GatewayError::authentication("AUTH_TOKEN_MALFORMED", "Expected `Bearer <token>`")
    })?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(GatewayError::authentication(
            "AUTH_TOKEN_MALFORMED",
            "Expected `Bearer <token>`",
        ));
    }
    Ok(token)
}

impl Middleware for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn context_field(&self) -> ContextField {
        ContextField::Actor
    }

    fn process<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Enrichment, GatewayError>> {
        Box::pin(async move {
            match self.authenticate(request).await {
                Ok(actor) => Ok(Enrichment::Actor(actor)),
                Err(err) => {
                    if err.status_code() == http::StatusCode::UNAUTHORIZED {
                        self.logger.security(
                            &ctx.log_context(),
                            "authentication_failed",
                            SecurityTier::Medium,
                            serde_json::json!({ "code": err.code() }),
                        );
                    }
                    Err(err)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IdentityError;
    use crate::identity::StaticIdentityResolver;
    use crate::stages::test_support::{actor, context, logger, request};
    use async_trait::async_trait;
    use http::{Method, StatusCode};
    use serde_json::Value;

    struct SlowResolver;

    #[async_trait]
    impl IdentityResolver for SlowResolver {
        async fn verify_token(&self, _token: &str) -> Result<String, IdentityError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("user-1".to_string())
        }

        async fn resolve_actor(&self, subject: &str) -> Result<Actor, IdentityError> {
            Err(IdentityError::actor_not_found(subject))
        }
    }

    fn stage(resolver: Arc<dyn IdentityResolver>) -> AuthStage {
        AuthStage::new(
            resolver,
            Arc::new(IdentityCache::with_ttl(Duration::from_secs(300), 100)),
            Duration::from_secs(2),
            logger(),
        )
    }

    async fn run(stage: &AuthStage, headers: &[(&str, &str)]) -> Result<Enrichment, GatewayError> {
        let ctx = context(&Method::GET, "/api/v2/entities", Value::Null);
        let req = request(&Method::GET, "/api/v2/entities", headers);
        stage.process(&ctx, &req).await
    }

    #[tokio::test]
    async fn test_resolves_and_caches_actor() {
        let resolver = Arc::new(StaticIdentityResolver::new().with_actor("tok-1", actor()));
        let stage = stage(resolver.clone());

        for _ in 0..3 {
            let enrichment = run(&stage, &[("Authorization", "Bearer tok-1")]).await.unwrap();
            let Enrichment::Actor(actor) = enrichment else {
                panic!("expected actor");
            };
            assert_eq!(actor.id, "user-1");
        }
        assert_eq!(resolver.resolutions(), 1);
        assert_eq!(stage.cache().stats().hits, 2);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_tokens() {
        let stage = stage(Arc::new(StaticIdentityResolver::new()));

        let err = run(&stage, &[]).await.unwrap_err();
        assert_eq!(err.code(), "AUTH_REQUIRED");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        for header in ["Basic abc", "Bearer", "Bearer   "] {
            let err = run(&stage, &[("Authorization", header)]).await.unwrap_err();
            assert_eq!(err.code(), "AUTH_TOKEN_MALFORMED", "{header}");
        }

        let err = run(&stage, &[("Authorization", "bearer unknown")]).await.unwrap_err();
        assert_eq!(err.code(), "AUTH_TOKEN_INVALID");
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_timeout_is_retryable_upstream_error() {
        let stage = stage(Arc::new(SlowResolver));
        let err = run(&stage, &[("Authorization", "Bearer tok-1")]).await.unwrap_err();
        assert_eq!(err.code(), "UPSTREAM_TIMEOUT");
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert!(err.is_retryable());
    }
}
