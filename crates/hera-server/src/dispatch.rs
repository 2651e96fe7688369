//! Terminal handler that forwards admitted requests to the business
//! backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hera_core::GatewayError;
use hera_middleware::{BoxFuture, Handler, Request, RequestContext, Response, ResponseExt};
use hera_telemetry::StructuredLogger;
use http::StatusCode;
use serde_json::json;

use crate::business::{BusinessClient, BusinessRequest};

/// Forwards each admitted request as one business call, bounded by a
/// timeout.
///
/// Successful calls answer `{"success": true, "data": ...}` with the
/// backend's status. A call that outlives the timeout becomes a retryable
/// 504.
pub struct BusinessHandler {
    client: Arc<dyn BusinessClient>,
    timeout: Duration,
    logger: Arc<StructuredLogger>,
}

impl BusinessHandler {
    /// Creates a handler.
    pub fn new(
        client: Arc<dyn BusinessClient>,
        timeout: Duration,
        logger: Arc<StructuredLogger>,
    ) -> Self {
        Self {
            client,
            timeout,
            logger,
        }
    }

    async fn dispatch(&self, ctx: &RequestContext) -> Result<Response, GatewayError> {
        let action = ctx.operation().to_string();
        let request = BusinessRequest::new(
            action.clone(),
            ctx.actor().id.clone(),
            ctx.org().organization_id.clone(),
            ctx.payload().clone(),
        )
        .with_params(ctx.params().to_map());

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.client.invoke(request)).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::upstream_timeout("business", self.timeout)),
        };
        self.logger.rpc(
            &ctx.log_context(),
            &action,
            started.elapsed(),
            outcome.as_ref().err(),
        );

        let result = outcome?;
        let status = StatusCode::from_u16(result.status)
            .ok()
            .filter(StatusCode::is_success)
            .unwrap_or(StatusCode::OK);
        let body = json!({ "success": true, "data": result.data });
        Ok(Response::json(status, Bytes::from(body.to_string())))
    }
}

impl Handler for BusinessHandler {
    fn call<'a>(
        &'a self,
        ctx: &'a RequestContext,
        _request: Request,
    ) -> BoxFuture<'a, Result<Response, GatewayError>> {
        Box::pin(self.dispatch(ctx))
    }
}

impl std::fmt::Debug for BusinessHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessHandler")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business::{BusinessResponse, RecordingBusinessClient};
    use crate::error::BusinessError;
    use hera_core::{Actor, Membership, OrgContext, RequestId};
    use hera_middleware::{Enrichment, MiddlewareContext};
    use hera_router::RouteRegistry;
    use hera_telemetry::{LogQuery, LoggerConfig};
    use http::Method;
    use serde_json::Value;

    fn frozen(method: &Method, path: &str, payload: Value) -> RequestContext {
        let registry = RouteRegistry::with_defaults().unwrap();
        let route = registry.match_route(method, path);
        let mut ctx = MiddlewareContext::new(RequestId::new(), method.clone(), path, &route, payload);
        let membership = Membership::new("org-A", ["member"]);
        ctx.apply(Enrichment::Actor(
            Actor::new("user-1", "u@example.com").with_membership(membership.clone()),
        ))
        .unwrap();
        ctx.apply(Enrichment::OrgContext(OrgContext::from_membership(&membership)))
            .unwrap();
        ctx.freeze().unwrap()
    }

    fn request() -> Request {
        http::Request::new(Bytes::new())
    }

    fn logger() -> Arc<StructuredLogger> {
        Arc::new(StructuredLogger::new(LoggerConfig::default()))
    }

    #[tokio::test]
    async fn test_dispatch_forwards_bound_identity() {
        let client = Arc::new(RecordingBusinessClient::new());
        let logger = logger();
        let handler = BusinessHandler::new(client.clone(), Duration::from_secs(1), logger.clone());
        let ctx = frozen(
            &Method::PUT,
            "/api/v2/entities/e-42",
            serde_json::json!({"entity_name": "Acme"}),
        );

        let response = handler.call(&ctx, request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["organization_id"], "org-A");

        let sent = client.last_request().unwrap();
        assert_eq!(sent.actor_id, "user-1");
        assert_eq!(sent.params.get("id").map(String::as_str), Some("e-42"));
        assert_eq!(logger.query(&LogQuery::new().tag("rpc")).len(), 1);
    }

    #[tokio::test]
    async fn test_backend_rejection_maps_to_business_error() {
        let client = Arc::new(
            RecordingBusinessClient::new()
                .with_responder(|_| Err(BusinessError::rejected("ENTITY_EXISTS", "duplicate"))),
        );
        let handler = BusinessHandler::new(client, Duration::from_secs(1), logger());
        let ctx = frozen(&Method::GET, "/api/v2/entities", Value::Null);

        let err = handler.call(&ctx, request()).await.unwrap_err();
        assert_eq!(err.code(), "ENTITY_EXISTS");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_backend_status_is_kept_when_successful() {
        let client = Arc::new(RecordingBusinessClient::new().with_responder(|_| {
            Ok(BusinessResponse {
                status: 201,
                data: serde_json::json!({"id": "e-1"}),
            })
        }));
        let handler = BusinessHandler::new(client, Duration::from_secs(1), logger());
        let ctx = frozen(&Method::GET, "/api/v2/entities", Value::Null);
        let response = handler.call(&ctx, request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out() {
        let client = Arc::new(RecordingBusinessClient::new().with_delay(Duration::from_secs(30)));
        let handler = BusinessHandler::new(client, Duration::from_secs(10), logger());
        let ctx = frozen(&Method::GET, "/api/v2/entities", Value::Null);

        let err = handler.call(&ctx, request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert!(err.is_retryable());
    }
}
