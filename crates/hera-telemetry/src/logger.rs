//! Request-lifecycle structured logger.
//!
//! [`StructuredLogger`] is constructed once by the lifecycle owner and shared
//! through an `Arc`. Each entry is mirrored into `tracing` at the matching
//! level, kept in a bounded ring buffer for introspection, and offered to an
//! optional [`LogSink`] without ever blocking the caller.

use crate::error::TelemetryError;
use crate::metrics;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use hera_core::{GatewayError, SecurityTier};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default ring buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Default capacity of the sink channel.
pub const DEFAULT_SINK_CAPACITY: usize = 1024;

/// Entry level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Suppressed outside development.
    Debug,
    /// Normal operation.
    Info,
    /// Degradation or rejected requests.
    Warn,
    /// Failures.
    Error,
}

impl LogLevel {
    fn for_severity(severity: SecurityTier) -> Self {
        match severity {
            SecurityTier::Low => Self::Info,
            SecurityTier::Medium | SecurityTier::High => Self::Warn,
            SecurityTier::Critical => Self::Error,
        }
    }
}

/// One structured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 timestamp, millisecond precision.
    pub timestamp: String,
    /// Level.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Actor id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Organization id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Request path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Severity for security and error entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<SecurityTier>,
    /// Query tags.
    pub tags: Vec<String>,
    /// Event-specific payload.
    pub data: Value,
}

impl LogEntry {
    /// Returns true if the entry carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Correlation fields attached to event helpers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    /// Correlation id.
    pub request_id: Option<String>,
    /// Actor id.
    pub actor_id: Option<String>,
    /// Organization id.
    pub organization_id: Option<String>,
    /// Request path.
    pub endpoint: Option<String>,
}

impl LogContext {
    /// Creates a context for one request.
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            ..Self::default()
        }
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Sets the organization.
    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// What is known about a request when it is admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestStart {
    /// Correlation id.
    pub request_id: String,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub endpoint: String,
}

/// Handle for one in-flight request, returned by [`StructuredLogger::start`].
///
/// Unique per `start` call, so requests that share a client-supplied
/// correlation id are tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(u64);

/// Identity and routing details learned while the chain runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAnnotation {
    /// Actor id.
    pub actor_id: Option<String>,
    /// Organization id.
    pub organization_id: Option<String>,
    /// Backend operation.
    pub operation: Option<String>,
    /// READ / WRITE / FINANCE.
    pub operation_class: Option<String>,
}

#[derive(Debug)]
struct ActiveRequest {
    start: RequestStart,
    annotation: RequestAnnotation,
    started: Instant,
    in_flight_at_start: usize,
}

/// Filter over buffered entries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    request_id: Option<String>,
    organization_id: Option<String>,
    min_severity: Option<SecurityTier>,
    min_level: Option<LogLevel>,
    tags: Vec<String>,
}

impl LogQuery {
    /// Matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one correlation id.
    #[must_use]
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Restricts to one tenant.
    #[must_use]
    pub fn organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Restricts to entries with at least this severity.
    #[must_use]
    pub fn min_severity(mut self, severity: SecurityTier) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Restricts to entries with at least this level.
    #[must_use]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = Some(level);
        self
    }

    /// Requires a tag. Repeated calls require all tags.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Returns true if `entry` satisfies every filter.
    #[must_use]
    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.request_id
            .as_ref()
            .map_or(true, |id| entry.request_id.as_ref() == Some(id))
            && self
                .organization_id
                .as_ref()
                .map_or(true, |id| entry.organization_id.as_ref() == Some(id))
            && self
                .min_severity
                .map_or(true, |min| entry.severity.is_some_and(|s| s >= min))
            && self.min_level.map_or(true, |min| entry.level >= min)
            && self.tags.iter().all(|t| entry.has_tag(t))
    }
}

/// Best-effort external destination for entries.
#[async_trait]
pub trait LogSink: Send + Sync + 'static {
    /// Sink name for diagnostics.
    fn name(&self) -> &'static str;

    /// Delivers one entry.
    async fn deliver(&self, entry: LogEntry) -> Result<(), TelemetryError>;

    /// Flushes buffered deliveries on shutdown.
    async fn flush(&self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Logger configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// Emit debug entries.
    pub development: bool,
    /// Ring buffer capacity.
    pub buffer_capacity: usize,
    /// Sink channel capacity.
    pub sink_capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            development: false,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            sink_capacity: DEFAULT_SINK_CAPACITY,
        }
    }
}

impl LoggerConfig {
    /// Development preset with debug entries enabled.
    #[must_use]
    pub fn development() -> Self {
        Self {
            development: true,
            ..Self::default()
        }
    }
}

/// Process-wide structured logger.
///
/// # Example
///
/// ```rust
/// use hera_telemetry::{LogQuery, LoggerConfig, RequestStart, StructuredLogger};
///
/// let logger = StructuredLogger::new(LoggerConfig::default());
/// let handle = logger.start(RequestStart {
///     request_id: "req-1".to_string(),
///     method: "POST".to_string(),
///     endpoint: "/api/v2/entities".to_string(),
/// });
/// logger.end(handle, 200, 512);
///
/// let completed = logger.query(&LogQuery::new().request_id("req-1").tag("request"));
/// assert_eq!(completed.len(), 1);
/// assert_eq!(completed[0].data["status_code"], 200);
/// ```
#[derive(Debug)]
pub struct StructuredLogger {
    config: LoggerConfig,
    buffer: Mutex<VecDeque<LogEntry>>,
    active: Mutex<HashMap<RequestHandle, ActiveRequest>>,
    next_handle: AtomicU64,
    sink: Mutex<Option<mpsc::Sender<LogEntry>>>,
    in_flight: AtomicUsize,
    dropped: AtomicU64,
}

impl StructuredLogger {
    /// Creates a logger without an external sink.
    #[must_use]
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(config.buffer_capacity.min(4096))),
            active: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            sink: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            config,
        }
    }

    /// Creates a logger forwarding to `sink`.
    ///
    /// Spawns the delivery task on the current Tokio runtime. The task ends
    /// after [`close_sink`](Self::close_sink) once the channel is drained.
    pub fn with_sink(config: LoggerConfig, sink: Arc<dyn LogSink>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<LogEntry>(config.sink_capacity.max(1));
        let logger = Self::new(config);
        *logger.sink.lock() = Some(tx);

        let worker = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = sink.deliver(entry).await {
                    tracing::warn!(sink = sink.name(), error = %e, "log sink delivery failed");
                }
            }
            if let Err(e) = sink.flush().await {
                tracing::warn!(sink = sink.name(), error = %e, "log sink flush failed");
            }
        });
        (logger, worker)
    }

    /// Closes the sink channel; the delivery task drains and flushes.
    pub fn close_sink(&self) {
        self.sink.lock().take();
    }

    /// Records the start of a request.
    ///
    /// The returned handle identifies this request to
    /// [`annotate`](Self::annotate) and [`end`](Self::end).
    pub fn start(&self, start: RequestStart) -> RequestHandle {
        let handle = RequestHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let in_flight_at_start = self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.debug(
            &LogContext::new(&start.request_id).with_endpoint(&start.endpoint),
            "request started",
            serde_json::json!({ "method": start.method }),
        );
        self.active.lock().insert(
            handle,
            ActiveRequest {
                start,
                annotation: RequestAnnotation::default(),
                started: Instant::now(),
                in_flight_at_start,
            },
        );
        handle
    }

    /// Attaches identity and routing details to an active request.
    pub fn annotate(&self, handle: RequestHandle, annotation: RequestAnnotation) {
        if let Some(active) = self.active.lock().get_mut(&handle) {
            active.annotation = annotation;
        }
    }

    /// Emits the completion record and returns the measured duration.
    ///
    /// Returns `None` if the handle was already ended.
    pub fn end(
        &self,
        handle: RequestHandle,
        status_code: u16,
        response_size: usize,
    ) -> Option<Duration> {
        let active = self.active.lock().remove(&handle)?;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        let duration = active.started.elapsed();

        metrics::record_request(&active.start.method, status_code, duration);

        let level = match status_code {
            500.. => LogLevel::Error,
            400..=499 => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        let annotation = active.annotation;
        let context = LogContext {
            request_id: Some(active.start.request_id),
            actor_id: annotation.actor_id,
            organization_id: annotation.organization_id,
            endpoint: Some(active.start.endpoint),
        };
        self.emit(
            level,
            &context,
            "request completed",
            None,
            vec!["request".to_string()],
            serde_json::json!({
                "method": active.start.method,
                "operation": annotation.operation,
                "operation_class": annotation.operation_class,
                "status_code": status_code,
                "response_size": response_size,
                "duration_ms": duration.as_secs_f64() * 1000.0,
                "in_flight_at_start": active.in_flight_at_start,
            }),
        );
        Some(duration)
    }

    /// Number of requests started but not ended.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Logs a guardrail pass.
    pub fn guardrails(
        &self,
        context: &LogContext,
        is_valid: bool,
        security_tier: SecurityTier,
        violated_rules: &[&str],
        details: Value,
    ) {
        for rule in violated_rules {
            metrics::record_guardrail_violation(rule);
        }
        let mut tags = vec!["guardrails".to_string()];
        if !is_valid {
            tags.push("violation".to_string());
        }
        let (level, message) = if is_valid {
            (LogLevel::Info, "guardrails passed")
        } else {
            (LogLevel::Warn, "guardrails rejected request")
        };
        self.emit(
            level,
            context,
            message,
            Some(security_tier),
            tags,
            serde_json::json!({ "is_valid": is_valid, "result": details }),
        );
    }

    /// Logs a rate-limit decision.
    pub fn rate_limit(
        &self,
        context: &LogContext,
        allowed: bool,
        operation_class: &str,
        limit: u32,
        remaining: u32,
    ) {
        let data = serde_json::json!({
            "allowed": allowed,
            "operation_class": operation_class,
            "limit": limit,
            "remaining": remaining,
        });
        if allowed {
            self.debug(context, "rate limit passed", data);
        } else {
            metrics::record_rate_limit_denied(operation_class);
            self.emit(
                LogLevel::Warn,
                context,
                "rate limit exceeded",
                None,
                vec!["rate_limit".to_string(), "denied".to_string()],
                data,
            );
        }
    }

    /// Logs an idempotency outcome (`new`, `replay`, `conflict`, `degraded`).
    pub fn idempotency(&self, context: &LogContext, outcome: &str, key_source: &str) {
        metrics::record_idempotency_event(outcome);
        let level = match outcome {
            "conflict" | "degraded" => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        self.emit(
            level,
            context,
            "idempotency outcome",
            None,
            vec!["idempotency".to_string(), outcome.to_string()],
            serde_json::json!({ "outcome": outcome, "key_source": key_source }),
        );
    }

    /// Logs a downstream call.
    pub fn rpc(
        &self,
        context: &LogContext,
        action: &str,
        duration: Duration,
        error: Option<&GatewayError>,
    ) {
        let mut data = serde_json::json!({
            "action": action,
            "duration_ms": duration.as_secs_f64() * 1000.0,
            "success": error.is_none(),
        });
        let (level, message) = match error {
            None => (LogLevel::Info, "rpc completed"),
            Some(err) => {
                data["error_code"] = Value::String(err.code().to_string());
                (LogLevel::Error, "rpc failed")
            }
        };
        self.emit(level, context, message, None, vec!["rpc".to_string()], data);
    }

    /// Logs a security event such as an admission rejection.
    pub fn security(&self, context: &LogContext, event: &str, severity: SecurityTier, details: Value) {
        let mut tags = vec!["security".to_string(), event.to_string()];
        if severity.is_alerting() {
            tags.push("alert".to_string());
        }
        self.emit(
            LogLevel::for_severity(severity).max(LogLevel::Warn),
            context,
            event,
            Some(severity),
            tags,
            details,
        );
    }

    /// Logs a request-terminating error at the severity of its category.
    pub fn error(&self, context: &LogContext, error: &GatewayError) {
        let severity = error.severity();
        let mut tags = vec!["error".to_string(), error.category().as_str().to_string()];
        if severity.is_alerting() {
            tags.push("alert".to_string());
        }
        self.emit(
            LogLevel::for_severity(severity),
            context,
            error.message(),
            Some(severity),
            tags,
            serde_json::json!({
                "code": error.code(),
                "category": error.category().as_str(),
                "status_code": error.status_code().as_u16(),
            }),
        );
    }

    /// Logs a debug entry; suppressed outside development.
    pub fn debug(&self, context: &LogContext, message: &str, data: Value) {
        if !self.config.development {
            return;
        }
        self.emit(LogLevel::Debug, context, message, None, Vec::new(), data);
    }

    /// Returns a snapshot of the ring buffer, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.buffer.lock().iter().cloned().collect()
    }

    /// Returns the buffered entries matching `query`, oldest first.
    #[must_use]
    pub fn query(&self, query: &LogQuery) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect()
    }

    /// Entries the sink channel could not accept.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn emit(
        &self,
        level: LogLevel,
        context: &LogContext,
        message: &str,
        severity: Option<SecurityTier>,
        tags: Vec<String>,
        data: Value,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message: message.to_string(),
            request_id: context.request_id.clone(),
            actor_id: context.actor_id.clone(),
            organization_id: context.organization_id.clone(),
            endpoint: context.endpoint.clone(),
            severity,
            tags,
            data,
        };
        mirror(&entry);

        if let Some(tx) = self.sink.lock().as_ref() {
            if tx.try_send(entry.clone()).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_log_drop();
            }
        }

        if self.config.buffer_capacity == 0 {
            return;
        }
        let mut buffer = self.buffer.lock();
        while buffer.len() >= self.config.buffer_capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }
}

fn mirror(entry: &LogEntry) {
    let request_id = entry.request_id.as_deref().unwrap_or("-");
    let organization_id = entry.organization_id.as_deref().unwrap_or("-");
    let tags = entry.tags.join(",");
    match entry.level {
        LogLevel::Debug => tracing::debug!(
            request_id,
            organization_id,
            tag = %tags,
            data = %entry.data,
            "{}",
            entry.message
        ),
        LogLevel::Info => tracing::info!(
            request_id,
            organization_id,
            tag = %tags,
            data = %entry.data,
            "{}",
            entry.message
        ),
        LogLevel::Warn => tracing::warn!(
            request_id,
            organization_id,
            tag = %tags,
            data = %entry.data,
            "{}",
            entry.message
        ),
        LogLevel::Error => tracing::error!(
            request_id,
            organization_id,
            tag = %tags,
            data = %entry.data,
            "{}",
            entry.message
        ),
    }
}
