//! Configuration schema types.
//!
//! Every section uses `deny_unknown_fields` with struct-level defaults, so a
//! file only needs to name the values it changes.

use hera_core::OperationClass;
use hera_telemetry::{LogConfig, LoggerConfig, MetricsConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Server configuration section.
///
/// # Example
///
/// ```
/// use hera_config::ServerConfig;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.shutdown_timeout_secs, 30);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP server bind address (e.g., "0.0.0.0:8080").
    pub http_addr: String,

    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_secs: u64,

    /// Maximum number of concurrent connections.
    pub max_connections: u32,

    /// Keep-alive timeout in seconds. None disables keep-alive.
    pub keep_alive_secs: Option<u64>,

    /// Take the client address from the first `X-Forwarded-For` hop.
    pub trust_forwarded_for: bool,

    /// Deployment environment name.
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            shutdown_timeout_secs: 30,
            max_connections: 10_000,
            keep_alive_secs: Some(60),
            trust_forwarded_for: false,
            environment: "production".to_string(),
        }
    }
}

impl ServerConfig {
    /// Returns true for the development environment.
    #[must_use]
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (production).
    #[default]
    Json,
    /// Pretty format (development).
    Pretty,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable the process subscriber.
    pub enabled: bool,

    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// ANSI colors in pretty output.
    pub ansi_enabled: bool,

    /// Include file and line.
    pub include_location: bool,

    /// Capacity of the structured logger's ring buffer.
    pub buffer_capacity: usize,

    /// Capacity of the external sink channel.
    pub sink_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            ansi_enabled: false,
            include_location: false,
            buffer_capacity: hera_telemetry::logger::DEFAULT_BUFFER_CAPACITY,
            sink_capacity: hera_telemetry::logger::DEFAULT_SINK_CAPACITY,
        }
    }
}

impl LoggingConfig {
    /// Subscriber settings.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            json_format: self.format == LogFormat::Json,
            file_line_info: self.include_location,
            include_target: true,
            ansi: self.ansi_enabled,
        }
    }

    /// Structured logger settings.
    #[must_use]
    pub fn logger_config(&self, development: bool) -> LoggerConfig {
        LoggerConfig {
            development,
            buffer_capacity: self.buffer_capacity,
            sink_capacity: self.sink_capacity,
        }
    }
}

/// Metrics configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsSection {
    /// Install the Prometheus recorder.
    pub enabled: bool,

    /// Standalone scrape listener address.
    pub addr: Option<String>,

    /// Serve `GET /metrics` from the gateway listener.
    pub expose_endpoint: bool,

    /// Histogram bucket boundaries for request duration.
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
            expose_endpoint: true,
            histogram_buckets: MetricsConfig::default().duration_buckets,
        }
    }
}

impl MetricsSection {
    /// Recorder settings.
    #[must_use]
    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.enabled,
            addr: self.addr.clone(),
            duration_buckets: self.histogram_buckets.clone(),
        }
    }
}

/// Perimeter admission (DDoS) filter section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Run the filter.
    pub enabled: bool,

    /// General payload cap in bytes.
    pub max_body_bytes: u64,

    /// Payload cap for multipart and file-upload content types.
    pub max_upload_bytes: u64,

    /// URL length cap in bytes.
    pub max_url_bytes: usize,

    /// Total header size cap in bytes.
    pub max_header_bytes: usize,

    /// Requests allowed per source over a rolling hour.
    pub max_requests_per_hour: u32,

    /// Block applied when the hourly cap is breached, in seconds.
    pub rate_block_secs: u64,

    /// Concurrent in-flight requests allowed per source.
    pub max_concurrent_per_source: u32,

    /// Assumed completion window after which an in-flight slot is released
    /// even if completion was never observed.
    pub concurrent_release_secs: u64,

    /// Minimum accepted `User-Agent` length.
    pub min_user_agent_len: usize,

    /// Case-insensitive `User-Agent` substrings that are rejected.
    pub blocked_user_agents: Vec<String>,

    /// Content types accepted for write methods (parameters ignored).
    pub allowed_content_types: Vec<String>,

    /// Suspicious-activity score above which reputation blocks apply.
    pub reputation_threshold: u32,

    /// First reputation block, doubled per point above the threshold.
    pub reputation_block_secs: u64,

    /// Upper bound of any block.
    pub max_block_secs: u64,

    /// Idle time after which an unblocked source record is collected.
    pub idle_retention_secs: u64,

    /// Admit (at MEDIUM risk) when the body cannot be read for scanning.
    pub fail_open_on_body_read: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_body_bytes: MIB,
            max_upload_bytes: 10 * MIB,
            max_url_bytes: 2 * KIB as usize,
            max_header_bytes: 16 * KIB as usize,
            max_requests_per_hour: 5_000,
            rate_block_secs: 15 * 60,
            max_concurrent_per_source: 50,
            concurrent_release_secs: 30,
            min_user_agent_len: 8,
            blocked_user_agents: [
                "sqlmap", "nikto", "nmap", "masscan", "zgrab", "dirbuster", "gobuster", "wpscan",
                "acunetix", "nessus", "havij", "w3af",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            allowed_content_types: [
                "application/json",
                "multipart/form-data",
                "application/x-www-form-urlencoded",
                "application/octet-stream",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            reputation_threshold: 10,
            reputation_block_secs: 60 * 60,
            max_block_secs: 24 * 60 * 60,
            idle_retention_secs: 24 * 60 * 60,
            fail_open_on_body_read: true,
        }
    }
}

/// Counting strategy of the rate limiter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Counts reset at aligned window boundaries.
    #[default]
    FixedWindow,
    /// Timestamps pruned against `now - window`.
    SlidingWindow,
}

/// Rate-limit configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Run the stage.
    pub enabled: bool,

    /// Counting strategy.
    pub strategy: RateLimitStrategy,

    /// Window length in seconds.
    pub window_secs: u64,

    /// READ budget per tenant and window.
    pub read_limit: u32,

    /// WRITE budget per tenant and window.
    pub write_limit: u32,

    /// FINANCE budget per tenant and window.
    pub finance_limit: u32,

    /// Budget of the privileged class.
    pub privileged_limit: u32,

    /// Roles whose requests count against the privileged class.
    pub privileged_roles: Vec<String>,

    /// Extra counter lifetime beyond the window, in seconds.
    pub ttl_buffer_secs: u64,

    /// Admit requests when the counter store fails.
    pub fail_open: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RateLimitStrategy::FixedWindow,
            window_secs: 60,
            read_limit: 300,
            write_limit: 60,
            finance_limit: 30,
            privileged_limit: 1_000,
            privileged_roles: vec!["platform_admin".to_string(), "system".to_string()],
            ttl_buffer_secs: 5,
            fail_open: true,
        }
    }
}

impl RateLimitConfig {
    /// Budget of an operation class.
    #[must_use]
    pub const fn limit_for(&self, class: OperationClass) -> u32 {
        match class {
            OperationClass::Read => self.read_limit,
            OperationClass::Write => self.write_limit,
            OperationClass::Finance => self.finance_limit,
        }
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Idempotency configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IdempotencyConfig {
    /// Run the stage.
    pub enabled: bool,

    /// Retention of completed WRITE records, in minutes.
    pub retention_minutes: u64,

    /// Retention of completed FINANCE records, in minutes.
    pub finance_retention_minutes: u64,

    /// Age after which an in-progress record is considered abandoned.
    pub in_progress_timeout_secs: u64,

    /// Maximum length of a client-supplied key.
    pub max_key_length: usize,

    /// Body members stripped before hashing.
    pub volatile_fields: Vec<String>,

    /// Treat requests as new when the record store fails.
    pub fail_open: bool,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_minutes: 15,
            finance_retention_minutes: 60,
            in_progress_timeout_secs: 60,
            max_key_length: 255,
            volatile_fields: [
                "timestamp",
                "created_at",
                "updated_at",
                "request_time",
                "client_timestamp",
                "nonce",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            fail_open: true,
        }
    }
}

impl IdempotencyConfig {
    /// Retention of completed records of an operation class.
    #[must_use]
    pub const fn retention_for(&self, class: OperationClass) -> Duration {
        let minutes = match class {
            OperationClass::Finance => self.finance_retention_minutes,
            _ => self.retention_minutes,
        };
        Duration::from_secs(minutes * 60)
    }
}

/// Identity collaborator section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// Base URL of the identity service.
    pub endpoint: Option<String>,

    /// Call timeout in milliseconds.
    pub timeout_ms: u64,

    /// Actor cache TTL in seconds.
    pub cache_ttl_secs: u64,

    /// Maximum cached actors.
    pub cache_capacity: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 2_000,
            cache_ttl_secs: 300,
            cache_capacity: 10_000,
        }
    }
}

/// Business-operation collaborator section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BusinessConfig {
    /// Base URL of the RPC endpoint.
    pub endpoint: Option<String>,

    /// Call timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 10_000,
        }
    }
}

/// Background maintenance section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceConfig {
    /// Interval of the sweep task, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_budgets() {
        let config = RateLimitConfig::default();
        assert_eq!(config.limit_for(OperationClass::Read), 300);
        assert_eq!(config.limit_for(OperationClass::Write), 60);
        assert_eq!(config.limit_for(OperationClass::Finance), 30);
        assert_eq!(config.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_retention_by_class() {
        let config = IdempotencyConfig::default();
        assert_eq!(
            config.retention_for(OperationClass::Write),
            Duration::from_secs(15 * 60)
        );
        assert_eq!(
            config.retention_for(OperationClass::Finance),
            Duration::from_secs(60 * 60)
        );
    }

    #[test]
    fn test_admission_caps() {
        let config = AdmissionConfig::default();
        assert_eq!(config.max_body_bytes, 1024 * 1024);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_url_bytes, 2048);
        assert_eq!(config.max_header_bytes, 16 * 1024);
        assert_eq!(config.max_block_secs, 86_400);
    }

    #[test]
    fn test_logging_conversion() {
        let logging = LoggingConfig {
            format: LogFormat::Pretty,
            level: "debug".to_string(),
            ..LoggingConfig::default()
        };
        let log = logging.log_config();
        assert!(!log.json_format);
        assert_eq!(log.level, "debug");
        assert!(logging.logger_config(true).development);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: RateLimitConfig = serde_json::from_str(r#"{"write_limit": 5}"#).unwrap();
        assert_eq!(config.write_limit, 5);
        assert_eq!(config.read_limit, 300);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<IdempotencyConfig, _> = serde_json::from_str(r#"{"ttl": 5}"#);
        assert!(result.is_err());
    }
}
