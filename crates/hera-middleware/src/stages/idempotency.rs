//! Idempotency stage.
//!
//! Sets the idempotency outcome, serves replays in place of the handler,
//! and finalizes the record once the handler's response exists.

use crate::context::{MiddlewareContext, RequestContext};
use crate::idempotency::{IdempotencyManager, IdempotencyOutcome};
use crate::middleware::{BoxFuture, ContextField, Enrichment, Middleware};
use crate::types::{Request, Response};
use hera_core::GatewayError;
use hera_telemetry::StructuredLogger;
use std::sync::Arc;

/// Deduplicates retried writes.
#[derive(Debug)]
pub struct IdempotencyStage {
    manager: Arc<IdempotencyManager>,
    logger: Arc<StructuredLogger>,
}

impl IdempotencyStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(manager: Arc<IdempotencyManager>, logger: Arc<StructuredLogger>) -> Self {
        Self { manager, logger }
    }
}

impl Middleware for IdempotencyStage {
    fn name(&self) -> &'static str {
        "idempotency"
    }

    fn context_field(&self) -> ContextField {
        ContextField::Idempotency
    }

    fn process<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Enrichment, GatewayError>> {
        Box::pin(async move {
            let Some((key, source)) = self.manager.resolve_key(ctx, request)? else {
                return Ok(Enrichment::Idempotency(IdempotencyOutcome::Exempt));
            };

            match self.manager.begin(key, source, ctx.operation_class()).await {
                Ok(outcome) => {
                    self.logger
                        .idempotency(&ctx.log_context(), outcome.as_str(), source.as_str());
                    Ok(Enrichment::Idempotency(outcome))
                }
                Err(err) => {
                    self.logger
                        .idempotency(&ctx.log_context(), "conflict", source.as_str());
                    Err(err)
                }
            }
        })
    }

    fn respond(&self, ctx: &RequestContext) -> Option<Response> {
        match ctx.idempotency()? {
            IdempotencyOutcome::Replay { response, .. } => Some(response.to_replay()),
            _ => None,
        }
    }

    fn after<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        response: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(outcome) = ctx.idempotency() {
                self.manager.finish(outcome, response).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::REPLAY_HEADER;
    use crate::stages::test_support::{bound_context, logger, request};
    use hera_config::IdempotencyConfig;
    use http::{Method, StatusCode};
    use serde_json::json;

    fn stage() -> IdempotencyStage {
        IdempotencyStage::new(
            Arc::new(IdempotencyManager::in_memory(IdempotencyConfig::default())),
            logger(),
        )
    }

    async fn admit(stage: &IdempotencyStage, body: serde_json::Value) -> Result<MiddlewareContext, GatewayError> {
        let mut ctx = bound_context(&Method::POST, "/api/v2/entities", "org-A", body);
        let req = request(&Method::POST, "/api/v2/entities", &[]);
        let enrichment = stage.process(&ctx, &req).await?;
        ctx.apply(enrichment).unwrap();
        Ok(ctx)
    }

    #[tokio::test]
    async fn test_completed_request_is_replayed() {
        let stage = stage();
        let body = json!({ "name": "Acme" });

        let first = admit(&stage, body.clone()).await.unwrap();
        assert!(stage.respond(&first.freeze().unwrap()).is_none());

        let mut response = Response::new(bytes::Bytes::from_static(br#"{"id":"ent-1"}"#));
        *response.status_mut() = StatusCode::CREATED;
        stage.after(&first, &mut response).await;

        let second = admit(&stage, body).await.unwrap();
        let replay = stage.respond(&second.freeze().unwrap()).unwrap();
        assert_eq!(replay.status(), StatusCode::CREATED);
        assert_eq!(replay.body().as_ref(), br#"{"id":"ent-1"}"#);
        assert_eq!(replay.headers()[REPLAY_HEADER], "true");
    }

    #[tokio::test]
    async fn test_in_progress_duplicate_conflicts() {
        let stage = stage();
        let body = json!({ "name": "Acme" });
        let _first = admit(&stage, body.clone()).await.unwrap();

        let err = admit(&stage, body).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.retry_after_seconds(), Some(1));
    }

    #[tokio::test]
    async fn test_reads_are_exempt() {
        let stage = stage();
        let mut ctx = bound_context(&Method::GET, "/api/v2/entities", "org-A", json!(null));
        let req = request(&Method::GET, "/api/v2/entities", &[]);
        let enrichment = stage.process(&ctx, &req).await.unwrap();
        ctx.apply(enrichment).unwrap();
        assert_eq!(ctx.idempotency(), Some(&IdempotencyOutcome::Exempt));
    }
}
