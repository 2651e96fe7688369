//! Guardrails stage.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, ContextField, Enrichment, Middleware};
use crate::types::Request;
use hera_core::GatewayError;
use hera_guardrails::{GuardrailInput, GuardrailsEngine};
use hera_telemetry::StructuredLogger;
use std::sync::Arc;

/// Runs the guardrail catalogue and rejects requests with any violation.
///
/// The rejection carries the most severe violation's code and the full
/// violation list in `details`.
#[derive(Debug)]
pub struct GuardrailsStage {
    engine: Arc<GuardrailsEngine>,
    logger: Arc<StructuredLogger>,
}

impl GuardrailsStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(engine: Arc<GuardrailsEngine>, logger: Arc<StructuredLogger>) -> Self {
        Self { engine, logger }
    }
}

impl Middleware for GuardrailsStage {
    fn name(&self) -> &'static str {
        "guardrails"
    }

    fn context_field(&self) -> ContextField {
        ContextField::Guardrails
    }

    fn process<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        _request: &'a Request,
    ) -> BoxFuture<'a, Result<Enrichment, GatewayError>> {
        Box::pin(async move {
            let (Some(actor), Some(org)) = (ctx.actor(), ctx.org()) else {
                return Err(GatewayError::internal(
                    "guardrails require a bound actor and organization",
                ));
            };

            let result = self.engine.validate(&GuardrailInput {
                actor,
                org,
                method: ctx.method(),
                path: ctx.path(),
                operation: ctx.operation(),
                operation_class: ctx.operation_class(),
                payload: ctx.payload(),
            });

            let details = result.to_details();
            let violated: Vec<&str> = result.violations.iter().map(|v| v.rule.as_str()).collect();
            self.logger.guardrails(
                &ctx.log_context(),
                result.is_valid,
                result.security_tier,
                &violated,
                details.clone(),
            );

            if result.is_valid {
                return Ok(Enrichment::Guardrails(result));
            }
            let code = result.primary_code().unwrap_or("GUARDRAIL_VIOLATION").to_string();
            Err(GatewayError::validation_with_details(
                code,
                format!(
                    "Request failed {} guardrail check(s)",
                    result.violations.len()
                ),
                details,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{bound_context, logger, request};
    use hera_telemetry::LogQuery;
    use http::{Method, StatusCode};
    use serde_json::json;

    fn stage() -> (GuardrailsStage, Arc<StructuredLogger>) {
        let logger = logger();
        (
            GuardrailsStage::new(Arc::new(GuardrailsEngine::with_defaults()), logger.clone()),
            logger,
        )
    }

    fn entity(org: &str) -> serde_json::Value {
        json!({
            "organization_id": org,
            "entity_data": {
                "entity_type": "CUSTOMER",
                "smart_code": "HERA.CRM.CUSTOMER.ENTITY.PROFILE.v1"
            }
        })
    }

    #[tokio::test]
    async fn test_valid_payload_enriches_context() {
        let (stage, logger) = stage();
        let ctx = bound_context(&Method::POST, "/api/v2/entities", "org-A", entity("org-A"));
        let req = request(&Method::POST, "/api/v2/entities", &[]);

        let Enrichment::Guardrails(result) = stage.process(&ctx, &req).await.unwrap() else {
            panic!("expected guardrail result");
        };
        assert!(result.is_valid);
        assert_eq!(logger.query(&LogQuery::new().tag("guardrails")).len(), 1);
    }

    #[tokio::test]
    async fn test_cross_tenant_payload_rejected_with_full_details() {
        let (stage, logger) = stage();
        let mut payload = entity("org-A");
        payload["entity_data"]["smart_code"] = json!("not-a-code");
        let ctx = bound_context(&Method::POST, "/api/v2/entities", "org-B", payload);
        let req = request(&Method::POST, "/api/v2/entities", &[]);

        let err = stage.process(&ctx, &req).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "ORG_FILTER_MISMATCH");

        let envelope = err.to_envelope(&ctx.error_context());
        let details = envelope.error.details.unwrap();
        let codes: Vec<&str> = details["violations"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v["code"].as_str())
            .collect();
        assert!(codes.contains(&"ORG_FILTER_MISMATCH"));
        assert!(codes.contains(&"SMART_CODE_INVALID"));

        assert_eq!(logger.query(&LogQuery::new().tag("violation")).len(), 1);
    }
}
