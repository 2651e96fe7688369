//! Rate limiting stage.
//!
//! Denials become 429 with `Retry-After` and `X-RateLimit-*` headers.
//! Every response of a request that passed the stage gets the
//! `X-RateLimit-*` headers too.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, ContextField, Enrichment, Middleware};
use crate::rate_limit::RateLimiter;
use crate::types::{Request, Response};
use hera_core::GatewayError;
use hera_telemetry::StructuredLogger;
use std::sync::Arc;

/// Enforces tenant budgets.
#[derive(Debug)]
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    logger: Arc<StructuredLogger>,
}

impl RateLimitStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, logger: Arc<StructuredLogger>) -> Self {
        Self { limiter, logger }
    }
}

impl Middleware for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn context_field(&self) -> ContextField {
        ContextField::RateLimit
    }

    fn process<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        _request: &'a Request,
    ) -> BoxFuture<'a, Result<Enrichment, GatewayError>> {
        Box::pin(async move {
            let org = ctx
                .org()
                .ok_or_else(|| GatewayError::internal("rate limiting requires an org binding"))?;

            let decision = self.limiter.check(org, ctx.operation_class()).await?;
            self.logger.rate_limit(
                &ctx.log_context(),
                decision.allowed,
                decision.class.as_str(),
                decision.limit,
                decision.remaining,
            );

            if decision.allowed {
                Ok(Enrichment::RateLimit(decision))
            } else {
                Err(decision.to_error())
            }
        })
    }

    fn after<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        response: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(decision) = ctx.rate_limit() {
                decision.apply_headers(response.headers_mut());
            }
        })
    }
}
