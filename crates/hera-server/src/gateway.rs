//! Request dispatch.
//!
//! [`Gateway::handle`] takes one buffered request from the connection
//! layer and runs it through every gate in order:
//!
//! 1. `/health` and `/ready` answer directly.
//! 2. The admission filter checks the head, then scans the body.
//! 3. The route registry resolves the route (404, 405, 410).
//! 4. The middleware chain runs and dispatches to the business backend.
//! 5. The completion record is logged, `X-Request-ID` and
//!    `X-Response-Time` are added, and the admission slot is released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hera_config::GatewayConfig;
use hera_core::{ErrorContext, GatewayError, RequestId, SharedClock, SystemClock};
use hera_guardrails::GuardrailsEngine;
use hera_middleware::{
    AuthStage, GuardrailsStage, Handler, IdempotencyManager, IdempotencyStage, IdentityCache,
    IdentityResolver, MemoryIdempotencyStore, MemoryRateLimitStore, MiddlewareContext,
    OrgContextStage, Pipeline, RateLimitStage, RateLimiter, Request, Response, ResponseExt,
    StaticIdentityResolver,
};
use hera_router::RouteRegistry;
use hera_telemetry::{InFlightGuard, LogContext, RequestHandle, RequestStart, StructuredLogger};
use http::header::HeaderValue;
use tracing::{debug, info};

use crate::admission::{AdmissionFilter, AdmissionPermit};
use crate::business::{BusinessClient, HttpBusinessClient, RecordingBusinessClient};
use crate::dispatch::BusinessHandler;
use crate::error::ServerError;
use crate::health::{probe_response, HealthCheck, ReadinessCheck};
use crate::identity_http::HttpIdentityResolver;
use crate::sweeper::Sweeper;

/// Correlation id header, honoured on requests and set on every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Processing time header, in whole milliseconds.
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// The assembled gateway.
pub struct Gateway {
    registry: Arc<RouteRegistry>,
    pipeline: Pipeline,
    handler: Arc<dyn Handler>,
    admission: Arc<AdmissionFilter>,
    rate_limiter: Arc<RateLimiter>,
    idempotency: Arc<IdempotencyManager>,
    identity_cache: Arc<IdentityCache>,
    logger: Arc<StructuredLogger>,
    health: HealthCheck,
    readiness: ReadinessCheck,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("routes", &self.registry.len())
            .field("stages", &self.pipeline.stage_names())
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Creates a builder from configuration.
    #[must_use]
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Handles one request from `source`.
    ///
    /// Never fails: every rejection becomes an error envelope response.
    pub async fn handle(&self, request: Request, source: &str) -> Response {
        let started = Instant::now();
        if let Some(response) = probe_response(
            request.method(),
            request.uri().path(),
            &self.health,
            &self.readiness,
        ) {
            return response;
        }

        let _in_flight = InFlightGuard::new();
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(RequestId::from_header)
            .unwrap_or_default();
        let log_handle = self.logger.start(RequestStart {
            request_id: request_id.to_string(),
            method: request.method().to_string(),
            endpoint: request.uri().path().to_string(),
        });

        let (mut response, permit) = self.process(&request_id, log_handle, request, source).await;

        let elapsed = started.elapsed();
        self.logger.end(log_handle, response.status().as_u16(), response.body().len());
        stamp(&mut response, &request_id, elapsed);
        drop(permit);
        response
    }

    async fn process(
        &self,
        request_id: &RequestId,
        log_handle: RequestHandle,
        request: Request,
        source: &str,
    ) -> (Response, Option<AdmissionPermit>) {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let log = LogContext::new(request_id.as_str()).with_endpoint(path.clone());
        let fail = |err: GatewayError| {
            self.logger.error(&log, &err);
            Response::from_error(&err, &ErrorContext::new(request_id.as_str(), path.as_str()))
        };

        let (head, body) = request.into_parts();
        let mut permit = match self.admission.admit(&head, source, &log) {
            Ok(permit) => permit,
            Err(rejection) => return (fail(rejection.to_error()), None),
        };
        if let Err(rejection) = self.admission.scan(&mut permit, &body, source, &log) {
            return (fail(rejection.to_error()), Some(permit));
        }

        let route = match self
            .registry
            .match_route(&method, &path)
            .into_result(&method, &path)
        {
            Ok(route) => route,
            Err(err) => return (fail(err), Some(permit)),
        };
        debug!(
            request_id = %request_id,
            handler = %route.route.handler,
            risk = permit.risk().as_str(),
            "route resolved"
        );

        let request = Request::from_parts(head, body);
        let ctx = match MiddlewareContext::from_request(request_id.clone(), &request, &route) {
            Ok(ctx) => ctx.with_log_handle(log_handle),
            Err(err) => return (fail(err), Some(permit)),
        };
        let response = self
            .pipeline
            .execute(ctx, request, self.handler.as_ref())
            .await;
        (response, Some(permit))
    }

    /// Returns the route registry.
    #[must_use]
    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    /// Returns the admission filter.
    #[must_use]
    pub fn admission(&self) -> &Arc<AdmissionFilter> {
        &self.admission
    }

    /// Returns the structured logger.
    #[must_use]
    pub fn logger(&self) -> &Arc<StructuredLogger> {
        &self.logger
    }

    /// Returns the actor cache.
    #[must_use]
    pub fn identity_cache(&self) -> &Arc<IdentityCache> {
        &self.identity_cache
    }

    /// Returns the readiness probe.
    #[must_use]
    pub fn readiness(&self) -> &ReadinessCheck {
        &self.readiness
    }

    /// Returns the liveness probe.
    #[must_use]
    pub fn health(&self) -> &HealthCheck {
        &self.health
    }

    /// Creates the sweep task over this gateway's stores.
    #[must_use]
    pub fn sweeper(&self, interval: Duration) -> Sweeper {
        Sweeper::new(
            Arc::clone(&self.rate_limiter),
            Arc::clone(&self.idempotency),
            Arc::clone(&self.admission),
            Arc::clone(&self.identity_cache),
            interval,
        )
    }
}

fn stamp(response: &mut Response, request_id: &RequestId, elapsed: Duration) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", elapsed.as_millis())) {
        headers.insert(RESPONSE_TIME_HEADER, value);
    }
}

/// Builder for [`Gateway`].
///
/// Collaborators default from configuration: an HTTP client when an
/// endpoint is configured, otherwise an in-process stand-in (a resolver
/// that knows no tokens, a backend that echoes its input).
///
/// # Example
///
/// ```
/// use hera_config::GatewayConfig;
/// use hera_server::Gateway;
///
/// let gateway = Gateway::builder(GatewayConfig::default()).build().unwrap();
/// assert!(gateway.registry().len() > 0);
/// assert!(gateway.readiness().is_ready());
/// ```
pub struct GatewayBuilder {
    config: GatewayConfig,
    logger: Option<Arc<StructuredLogger>>,
    identity: Option<Arc<dyn IdentityResolver>>,
    business: Option<Arc<dyn BusinessClient>>,
    registry: Option<RouteRegistry>,
    clock: SharedClock,
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("identity", &self.identity.is_some())
            .field("business", &self.business.is_some())
            .finish_non_exhaustive()
    }
}

impl GatewayBuilder {
    /// Creates a builder from configuration.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            logger: None,
            identity: None,
            business: None,
            registry: None,
            clock: SystemClock::shared(),
        }
    }

    /// Uses an existing structured logger.
    #[must_use]
    pub fn logger(mut self, logger: Arc<StructuredLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Uses the given identity collaborator.
    #[must_use]
    pub fn identity(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.identity = Some(resolver);
        self
    }

    /// Uses the given business collaborator.
    #[must_use]
    pub fn business(mut self, client: Arc<dyn BusinessClient>) -> Self {
        self.business = Some(client);
        self
    }

    /// Uses a custom route table instead of the default one.
    #[must_use]
    pub fn registry(mut self, registry: RouteRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Uses the given clock for every window and retention.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Assembles the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the route table, the guardrail settings,
    /// a collaborator client, or the stage order is invalid.
    pub fn build(self) -> Result<Gateway, ServerError> {
        let config = self.config;
        let development = config.server.is_development();
        let logger = self.logger.unwrap_or_else(|| {
            Arc::new(StructuredLogger::new(config.logging.logger_config(development)))
        });
        let registry = match self.registry {
            Some(registry) => registry,
            None => RouteRegistry::with_defaults()?,
        };
        let registry = Arc::new(registry);

        let identity_timeout = Duration::from_millis(config.identity.timeout_ms);
        let identity: Arc<dyn IdentityResolver> = match (self.identity, &config.identity.endpoint) {
            (Some(resolver), _) => resolver,
            (None, Some(endpoint)) => Arc::new(HttpIdentityResolver::new(endpoint, identity_timeout)?),
            (None, None) => {
                info!("no identity endpoint configured, every token will be rejected");
                Arc::new(StaticIdentityResolver::new())
            }
        };

        let business_timeout = Duration::from_millis(config.business.timeout_ms);
        let business: Arc<dyn BusinessClient> = match (self.business, &config.business.endpoint) {
            (Some(client), _) => client,
            (None, Some(endpoint)) => Arc::new(HttpBusinessClient::new(endpoint, business_timeout)?),
            (None, None) => {
                info!("no business endpoint configured, operations are echoed");
                Arc::new(RecordingBusinessClient::new())
            }
        };

        let identity_cache = Arc::new(IdentityCache::new(
            Duration::from_secs(config.identity.cache_ttl_secs),
            config.identity.cache_capacity,
            Arc::clone(&self.clock),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.clone(),
            Arc::new(MemoryRateLimitStore::new()),
            Arc::clone(&self.clock),
        ));
        let idempotency = Arc::new(IdempotencyManager::new(
            config.idempotency.clone(),
            Arc::new(MemoryIdempotencyStore::new()),
            Arc::clone(&self.clock),
        ));
        let guardrails = Arc::new(GuardrailsEngine::new(config.guardrails.clone())?);
        let admission = Arc::new(AdmissionFilter::with_clock(
            config.admission.clone(),
            Arc::clone(&logger),
            Arc::clone(&self.clock),
        ));

        let mut builder = Pipeline::builder(Arc::clone(&logger))
            .stage(AuthStage::new(
                identity,
                Arc::clone(&identity_cache),
                identity_timeout,
                Arc::clone(&logger),
            ))
            .stage(OrgContextStage::new(Arc::clone(&logger)))
            .stage(GuardrailsStage::new(guardrails, Arc::clone(&logger)));
        if config.rate_limit.enabled {
            builder = builder.stage(RateLimitStage::new(
                Arc::clone(&rate_limiter),
                Arc::clone(&logger),
            ));
        }
        if config.idempotency.enabled {
            builder = builder.stage(IdempotencyStage::new(
                Arc::clone(&idempotency),
                Arc::clone(&logger),
            ));
        }
        let pipeline = builder.build()?;

        let handler: Arc<dyn Handler> = Arc::new(BusinessHandler::new(
            business,
            business_timeout,
            Arc::clone(&logger),
        ));

        let routes = Arc::clone(&registry);
        let readiness = ReadinessCheck::new().add_check("routes_loaded", move || !routes.is_empty());

        info!(
            routes = registry.len(),
            stages = ?pipeline.stage_names(),
            "gateway assembled"
        );

        Ok(Gateway {
            registry,
            pipeline,
            handler,
            admission,
            rate_limiter,
            idempotency,
            identity_cache,
            logger,
            health: HealthCheck::new("hera-gateway", env!("CARGO_PKG_VERSION")),
            readiness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hera_core::{Actor, Membership};
    use hera_telemetry::LogQuery;
    use http::StatusCode;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;

    fn gateway() -> Gateway {
        let identity = StaticIdentityResolver::new().with_actor(
            "token-a",
            Actor::new("user-1", "u@example.com").with_membership(Membership::new("org-A", ["owner"])),
        );
        Gateway::builder(GatewayConfig::default())
            .identity(Arc::new(identity))
            .build()
            .unwrap()
    }

    fn get(path: &str) -> Request {
        http::Request::get(path)
            .header("user-agent", "hera-client/1.0")
            .header("authorization", "Bearer token-a")
            .body(Bytes::new())
            .unwrap()
    }

    fn body(response: &Response) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn test_probes_bypass_admission() {
        let gateway = gateway();
        let request = http::Request::get("/health").body(Bytes::new()).unwrap();
        let response = gateway.handle(request, "10.0.0.1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(gateway.admission().stats().tracked_sources, 0);
    }

    #[tokio::test]
    async fn test_read_is_dispatched_and_stamped() {
        let gateway = gateway();
        let response = gateway.handle(get("/api/v2/entities"), "10.0.0.1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let timing = response.headers()[RESPONSE_TIME_HEADER].to_str().unwrap();
        assert!(timing.ends_with("ms"));
        assert_eq!(body(&response)["success"], true);
        assert_eq!(gateway.admission().stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_client_request_id_is_echoed() {
        let gateway = gateway();
        let mut request = get("/api/v2/entities");
        request
            .headers_mut()
            .insert(REQUEST_ID_HEADER, HeaderValue::from_static("client-req-7"));
        let response = gateway.handle(request, "10.0.0.1").await;
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "client-req-7");

        let entries = gateway.logger().query(&LogQuery::new().request_id("client-req-7"));
        assert!(!entries.is_empty());
    }

    #[tokio::test]
    async fn test_shared_request_id_keeps_every_completion_record() {
        let gateway = gateway();
        let shared = || {
            let mut request = get("/api/v2/entities");
            request
                .headers_mut()
                .insert(REQUEST_ID_HEADER, HeaderValue::from_static("client-id"));
            request
        };

        let (a, b) = tokio::join!(
            gateway.handle(shared(), "10.0.0.1"),
            gateway.handle(shared(), "10.0.0.2"),
        );
        assert_eq!(a.status(), StatusCode::OK);
        assert_eq!(b.status(), StatusCode::OK);

        let completed = gateway
            .logger()
            .query(&LogQuery::new().request_id("client-id").tag("request"));
        assert_eq!(completed.len(), 2);
        assert_eq!(gateway.logger().in_flight(), 0);
    }

    #[test]
    fn test_each_request_is_counted_once() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let rendered = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let gateway = gateway();
                let response = gateway.handle(get("/api/v2/unknown"), "10.0.0.1").await;
                assert_eq!(response.status(), StatusCode::NOT_FOUND);
            });
        });

        let output = rendered.render();
        let counted: Vec<&str> = output
            .lines()
            .filter(|line| line.starts_with("hera_requests_total{"))
            .collect();
        assert_eq!(counted.len(), 1, "{output}");
        assert!(counted[0].contains(r#"status="404""#), "{output}");
        assert!(counted[0].ends_with(" 1"), "{output}");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404_before_auth() {
        let gateway = gateway();
        let request = http::Request::get("/api/v2/unknown")
            .header("user-agent", "hera-client/1.0")
            .body(Bytes::new())
            .unwrap();
        let response = gateway.handle(request, "10.0.0.1").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_admission_rejection_is_stamped() {
        let gateway = gateway();
        let request = http::Request::get("/api/v2/entities")
            .header("user-agent", "sqlmap/1.7")
            .body(Bytes::new())
            .unwrap();
        let response = gateway.handle(request, "10.0.0.9").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body(&response)["error"]["code"], "BLOCKED_USER_AGENT");
        assert!(response.headers().contains_key(RESPONSE_TIME_HEADER));
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let gateway = gateway();
        let request = http::Request::post("/api/v2/entities")
            .header("user-agent", "hera-client/1.0")
            .header("content-type", "application/json")
            .header("authorization", "Bearer token-a")
            .body(Bytes::from_static(b"{not json"))
            .unwrap();
        let response = gateway.handle(request, "10.0.0.1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(&response)["error"]["code"], "INVALID_JSON");
    }

    #[test]
    fn test_disabled_stages_are_left_out() {
        let mut config = GatewayConfig::default();
        config.rate_limit.enabled = false;
        config.idempotency.enabled = false;
        let gateway = Gateway::builder(config).build().unwrap();
        assert_eq!(
            gateway.pipeline.stage_names(),
            vec!["auth", "org_context", "guardrails"]
        );
    }
}
