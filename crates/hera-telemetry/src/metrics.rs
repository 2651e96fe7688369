//! Prometheus metrics for the gateway.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hera_requests_total` | Counter | `method`, `status` | Completed requests |
//! | `hera_request_duration_seconds` | Histogram | `method` | Request latency |
//! | `hera_in_flight_requests` | Gauge | - | Requests currently processing |
//! | `hera_guardrail_violations_total` | Counter | `rule` | Guardrail violations |
//! | `hera_rate_limit_denied_total` | Counter | `class` | Rate-limit denials |
//! | `hera_idempotency_events_total` | Counter | `outcome` | Idempotency outcomes |
//! | `hera_admission_rejections_total` | Counter | `check`, `risk` | Admission rejections |
//! | `hera_log_entries_dropped_total` | Counter | - | Entries the log sink could not accept |
//!
//! Recording functions are no-ops until a recorder is installed.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address of a standalone scrape listener. `None` installs the recorder
    /// only, for rendering through [`render_metrics`]. A listener requires a
    /// running Tokio runtime.
    pub addr: Option<String>,

    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Installs the Prometheus recorder.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable listener
/// address, or `TelemetryError::MetricsInit` if a recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "hera_request_duration_seconds".to_string(),
            ),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = match &config.addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            let (recorder, exporter) = builder
                .with_http_listener(addr)
                .build()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder).map_err(|_| {
                TelemetryError::MetricsInit("a metrics recorder is already installed".to_string())
            })?;
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    tracing::warn!(error = ?e, "metrics listener stopped");
                }
            });
            handle
        }
        None => builder
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
    };

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!("hera_requests_total", "Total number of requests completed");
    describe_histogram!(
        "hera_request_duration_seconds",
        "Request duration in seconds"
    );
    describe_gauge!(
        "hera_in_flight_requests",
        "Number of requests currently being processed"
    );
    describe_counter!(
        "hera_guardrail_violations_total",
        "Guardrail violations by rule"
    );
    describe_counter!(
        "hera_rate_limit_denied_total",
        "Rate-limit denials by operation class"
    );
    describe_counter!(
        "hera_idempotency_events_total",
        "Idempotency outcomes (new, replay, conflict, degraded)"
    );
    describe_counter!(
        "hera_admission_rejections_total",
        "Admission filter rejections by check and risk"
    );
    describe_counter!(
        "hera_log_entries_dropped_total",
        "Log entries dropped because the sink channel was full"
    );
}

/// Records a completed request.
pub fn record_request(method: &str, status_code: u16, duration: Duration) {
    counter!(
        "hera_requests_total",
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!("hera_request_duration_seconds", "method" => method.to_string())
        .record(duration.as_secs_f64());
}

/// Records one guardrail violation.
pub fn record_guardrail_violation(rule: &str) {
    counter!("hera_guardrail_violations_total", "rule" => rule.to_string()).increment(1);
}

/// Records a rate-limit denial.
pub fn record_rate_limit_denied(class: &str) {
    counter!("hera_rate_limit_denied_total", "class" => class.to_string()).increment(1);
}

/// Records an idempotency outcome.
pub fn record_idempotency_event(outcome: &str) {
    counter!("hera_idempotency_events_total", "outcome" => outcome.to_string()).increment(1);
}

/// Records an admission rejection.
pub fn record_admission_rejection(check: &str, risk: &str) {
    counter!(
        "hera_admission_rejections_total",
        "check" => check.to_string(),
        "risk" => risk.to_string()
    )
    .increment(1);
}

pub(crate) fn record_log_drop() {
    counter!("hera_log_entries_dropped_total").increment(1);
}

/// Guard that tracks one in-flight request.
///
/// The gauge is decremented on drop, so early returns and panics are
/// accounted for.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!("hera_in_flight_requests").increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("hera_in_flight_requests").decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(config.addr.is_none());
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_record_functions_dont_panic() {
        record_request("POST", 200, Duration::from_millis(10));
        record_guardrail_violation("ledger_balance");
        record_rate_limit_denied("WRITE");
        record_idempotency_event("replay");
        record_admission_rejection("payload_pattern", "CRITICAL");
        let _guard = InFlightGuard::new();
    }

    #[test]
    fn test_invalid_listener_address() {
        let config = MetricsConfig {
            addr: Some("not-an-address".to_string()),
            ..MetricsConfig::default()
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }
}
