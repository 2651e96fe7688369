//! HTTP server.
//!
//! Accepts connections with Hyper and Tokio, buffers each request body
//! under a size cap and a read timeout, and hands the request to the
//! [`Gateway`].
//!
//! # Architecture
//!
//! - TCP listener bound to `server.http_addr`
//! - One task per connection, counted by a [`ConnectionTracker`]
//! - Graceful shutdown: stop accepting, fail readiness, let open
//!   connections finish their current request, wait up to
//!   `server.shutdown_timeout_secs`

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hera_config::ServerConfig;
use hera_core::{ErrorContext, GatewayError, RequestId, RiskLevel};
use hera_middleware::{Response, ResponseExt};
use hera_telemetry::render_metrics;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::gateway::Gateway;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Type alias for the HTTP response body.
pub type ResponseBody = Full<Bytes>;

/// Path of the Prometheus scrape endpoint.
pub const METRICS_PATH: &str = "/metrics";

const FORWARDED_FOR: &str = "x-forwarded-for";
const BODY_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// The HERA HTTP server.
pub struct Server {
    gateway: Arc<Gateway>,
    config: ServerConfig,
    body_limit: usize,
    expose_metrics: bool,
    tracker: ConnectionTracker,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("http_addr", &self.config.http_addr)
            .field("body_limit", &self.body_limit)
            .field("active", &self.tracker.active())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server for `gateway`.
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, config: ServerConfig) -> Self {
        let admission = gateway.admission().config();
        let body_limit = admission.max_body_bytes.max(admission.max_upload_bytes);
        Self {
            gateway,
            config,
            body_limit: usize::try_from(body_limit).unwrap_or(usize::MAX),
            expose_metrics: false,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Serves `GET /metrics` from the installed Prometheus recorder.
    #[must_use]
    pub fn expose_metrics(mut self, enabled: bool) -> Self {
        self.expose_metrics = enabled;
        self
    }

    /// Returns the connection tracker.
    #[must_use]
    pub fn connections(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr: SocketAddr = self
            .config
            .http_addr
            .parse()
            .map_err(|e| ServerError::bind(&self.config.http_addr, format!("invalid address: {e}")))?;
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e.to_string()))
    }

    /// Binds and serves until `shutdown` triggers.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serves an already bound listener until `shutdown` triggers, then
    /// drains open connections.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        info!(addr = %local, "gateway listening");

        let server = Arc::new(self);
        let stopped = shutdown.recv();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => server.spawn_connection(stream, remote, &shutdown),
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
                () = &mut stopped => {
                    info!("shutdown signal received, no longer accepting");
                    break;
                }
            }
        }
        drop(listener);

        server.gateway.readiness().start_draining();
        let timeout = Duration::from_secs(server.config.shutdown_timeout_secs);
        info!(
            active = server.tracker.active(),
            timeout_secs = timeout.as_secs(),
            "draining connections"
        );
        if tokio::time::timeout(timeout, server.tracker.drained())
            .await
            .is_err()
        {
            warn!(
                active = server.tracker.active(),
                "shutdown timeout reached with connections still open"
            );
        } else {
            info!("all connections closed");
        }
        Ok(())
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, remote: SocketAddr, shutdown: &ShutdownSignal) {
        let limit = usize::try_from(self.config.max_connections).unwrap_or(usize::MAX);
        if self.tracker.active() >= limit {
            warn!(remote = %remote, limit, "connection limit reached, refusing");
            return;
        }
        let token = self.tracker.acquire();
        let server = Arc::clone(self);
        let stopped = shutdown.recv();

        tokio::spawn(async move {
            let service_owner = Arc::clone(&server);
            let service = service_fn(move |request: http::Request<Incoming>| {
                let server = Arc::clone(&service_owner);
                async move { Ok::<_, Infallible>(server.handle(request, remote).await) }
            });

            let mut builder = http1::Builder::new();
            builder.keep_alive(server.config.keep_alive_secs.is_some());
            let connection = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(connection);
            tokio::pin!(stopped);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                () = &mut stopped => {
                    connection.as_mut().graceful_shutdown();
                    connection.as_mut().await
                }
            };
            if let Err(e) = result {
                debug!(remote = %remote, error = %e, "connection closed with error");
            }
            drop(token);
        });
    }

    async fn handle(&self, request: http::Request<Incoming>, remote: SocketAddr) -> http::Response<ResponseBody> {
        if self.expose_metrics && request.method() == Method::GET && request.uri().path() == METRICS_PATH {
            return metrics_response();
        }

        let source = client_source(request.headers(), remote, self.config.trust_forwarded_for);
        let (head, body) = request.into_parts();
        let path = head.uri.path().to_string();

        let read = tokio::time::timeout(BODY_READ_TIMEOUT, Limited::new(body, self.body_limit).collect()).await;
        let body = match read {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
                let err = GatewayError::admission(
                    "PAYLOAD_TOO_LARGE",
                    format!("request body exceeds {} bytes", self.body_limit),
                    RiskLevel::Medium,
                    None,
                );
                return into_hyper(early_error(&err, &path));
            }
            Ok(Err(e)) => {
                let err = GatewayError::validation("BODY_READ_ERROR", format!("failed to read request body: {e}"));
                return into_hyper(early_error(&err, &path));
            }
            Err(_) => {
                let err = GatewayError::validation("BODY_READ_TIMEOUT", "request body was not received in time");
                return into_hyper(early_error(&err, &path));
            }
        };

        let response = self
            .gateway
            .handle(http::Request::from_parts(head, body), &source)
            .await;
        into_hyper(response)
    }
}

/// Returns the client address used for per-source admission tracking.
///
/// With `trust_forwarded_for`, the left-most `X-Forwarded-For` entry wins;
/// otherwise the peer address is used.
#[must_use]
pub fn client_source(headers: &HeaderMap, remote: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(client) = forwarded {
            return client.to_string();
        }
    }
    remote.ip().to_string()
}

fn early_error(err: &GatewayError, path: &str) -> Response {
    let request_id = RequestId::new();
    let mut response = Response::from_error(err, &ErrorContext::new(request_id.as_str(), path));
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(crate::gateway::REQUEST_ID_HEADER, value);
    }
    response
}

fn metrics_response() -> http::Response<ResponseBody> {
    let (status, body) = match render_metrics() {
        Some(text) => (StatusCode::OK, text),
        None => (StatusCode::NOT_FOUND, String::new()),
    };
    let mut response = http::Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

fn into_hyper(response: Response) -> http::Response<ResponseBody> {
    response.map(Full::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hera_config::GatewayConfig;
    use std::net::{IpAddr, Ipv4Addr};

    fn remote() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), 50_000)
    }

    #[test]
    fn test_client_source_uses_peer_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));
        assert_eq!(client_source(&headers, remote(), false), "192.168.1.20");
    }

    #[test]
    fn test_client_source_trusts_left_most_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        assert_eq!(client_source(&headers, remote(), true), "203.0.113.7");
        assert_eq!(client_source(&HeaderMap::new(), remote(), true), "192.168.1.20");
    }

    #[test]
    fn test_body_limit_covers_uploads() {
        let gateway = Arc::new(Gateway::builder(GatewayConfig::default()).build().unwrap());
        let server = Server::new(gateway, ServerConfig::default());
        assert_eq!(server.body_limit, 10 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_serve_answers_and_drains() {
        let gateway = Arc::new(Gateway::builder(GatewayConfig::default()).build().unwrap());
        let mut config = ServerConfig::default();
        config.http_addr = "127.0.0.1:0".to_string();
        config.shutdown_timeout_secs = 1;
        let server = Server::new(Arc::clone(&gateway), config);
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = ShutdownSignal::new();
        let handle = tokio::spawn(server.serve(listener, shutdown.clone()));

        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let response = reqwest::Client::new()
            .get(format!("http://{addr}/api/v2/nowhere"))
            .header("user-agent", "hera-client/1.0")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server should stop")
            .expect("server task should not panic")
            .unwrap();
        assert!(gateway.readiness().is_draining());
    }
}
