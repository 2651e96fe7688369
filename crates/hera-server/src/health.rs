//! Liveness and readiness probes.
//!
//! - `GET /health`: the process is up. Always 200.
//! - `GET /ready`: the gateway accepts traffic. 503 while draining or when
//!   a registered check fails.
//!
//! Both bypass admission and the middleware chain.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hera_middleware::{Response, ResponseExt};
use http::{Method, StatusCode};
use serde::Serialize;

/// Path of the liveness probe.
pub const HEALTH_PATH: &str = "/health";

/// Path of the readiness probe.
pub const READY_PATH: &str = "/ready";

/// Body of `/health`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// Always `"healthy"` while the process answers.
    pub status: &'static str,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Seconds since start.
    pub uptime_seconds: u64,
}

/// Liveness probe.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    service: String,
    version: String,
    started: Instant,
}

impl HealthCheck {
    /// Creates a probe for a service.
    #[must_use]
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            started: Instant::now(),
        }
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            service: self.service.clone(),
            version: self.version.clone(),
            uptime_seconds: self.uptime().as_secs(),
        }
    }

    /// Returns time since start.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Body of `/ready`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReadinessStatus {
    /// Whether traffic should be routed here.
    pub ready: bool,
    /// Whether the gateway is shutting down.
    pub draining: bool,
    /// Result of each registered check.
    pub checks: BTreeMap<String, bool>,
}

type CheckFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Readiness probe.
///
/// # Example
///
/// ```
/// use hera_server::ReadinessCheck;
///
/// let readiness = ReadinessCheck::new().add_check("routes_loaded", || true);
/// assert!(readiness.is_ready());
///
/// readiness.start_draining();
/// let status = readiness.status();
/// assert!(!status.ready);
/// assert!(status.draining);
/// ```
#[derive(Clone, Default)]
pub struct ReadinessCheck {
    checks: Vec<(String, CheckFn)>,
    draining: Arc<AtomicBool>,
}

impl ReadinessCheck {
    /// Creates a probe with no checks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named check.
    #[must_use]
    pub fn add_check<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.checks.push((name.into(), Arc::new(check)));
        self
    }

    /// Marks the gateway as draining. Readiness fails from now on.
    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once draining started.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Returns `true` if not draining and every check passes.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.is_draining() && self.checks.iter().all(|(_, check)| check())
    }

    /// Evaluates every check.
    #[must_use]
    pub fn status(&self) -> ReadinessStatus {
        let checks: BTreeMap<String, bool> = self
            .checks
            .iter()
            .map(|(name, check)| (name.clone(), check()))
            .collect();
        let draining = self.is_draining();
        ReadinessStatus {
            ready: !draining && checks.values().all(|ok| *ok),
            draining,
            checks,
        }
    }
}

impl std::fmt::Debug for ReadinessCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessCheck")
            .field("checks", &self.checks.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("draining", &self.is_draining())
            .finish()
    }
}

/// Answers a probe request, or returns `None` for any other request.
#[must_use]
pub fn probe_response(
    method: &Method,
    path: &str,
    health: &HealthCheck,
    readiness: &ReadinessCheck,
) -> Option<Response> {
    if method != Method::GET {
        return None;
    }
    match path {
        HEALTH_PATH => Some(json_response(StatusCode::OK, &health.status())),
        READY_PATH => {
            let status = readiness.status();
            let code = if status.ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Some(json_response(code, &status))
        }
        _ => None,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let body = serde_json::to_vec(body).unwrap_or_default();
    Response::json(status, Bytes::from(body))
}
