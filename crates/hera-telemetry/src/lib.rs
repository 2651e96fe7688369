//! Observability for the HERA gateway.
//!
//! - **Structured logging**: [`StructuredLogger`] records the lifecycle of
//!   every request plus dedicated events (guardrails, rate limits,
//!   idempotency, downstream calls, security)
//! - **Process logging**: [`init_logging`] installs a `tracing-subscriber`
//!   registry with JSON or pretty output
//! - **Metrics**: Prometheus-format metrics via the `metrics` crate
//!
//! # Architecture
//!
//! ```text
//!   request path                      StructuredLogger
//!  ──────────────                 ┌───────────────────────┐
//!   start / end ─────────────────▶│ emit(entry)           │
//!   guardrails / rate_limit ─────▶│   ├─▶ tracing (mirror) │──▶ stdout (JSON / pretty)
//!   idempotency / rpc ───────────▶│   ├─▶ ring buffer      │──▶ query() / entries()
//!   security / error ────────────▶│   └─▶ try_send ────────│──▶ LogSink task (best effort)
//!                                 └───────────────────────┘
//! ```
//!
//! The request path never awaits the sink: a full channel drops the entry
//! and increments `hera_log_entries_dropped_total`.

#![doc(html_root_url = "https://docs.rs/hera-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logger;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logger::{
    LogContext, LogEntry, LogLevel, LogQuery, LogSink, LoggerConfig, RequestAnnotation,
    RequestHandle, RequestStart, StructuredLogger,
};
pub use logging::{fields, init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, InFlightGuard, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
