//! Typed configuration for the HERA gateway.
//!
//! - TOML and JSON configuration files
//! - `.env` files via `dotenvy`
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//!
//! # Overview
//!
//! [`GatewayConfig`] holds one section per component:
//!
//! | Section       | Type                  | Controls                                      |
//! |---------------|-----------------------|-----------------------------------------------|
//! | `server`      | [`ServerConfig`]      | bind address, shutdown, environment           |
//! | `logging`     | [`LoggingConfig`]     | subscriber format, structured logger buffers  |
//! | `metrics`     | [`MetricsSection`]    | Prometheus recorder and `/metrics`            |
//! | `admission`   | [`AdmissionConfig`]   | perimeter caps, per-source limits, reputation |
//! | `rate_limit`  | [`RateLimitConfig`]   | per-tenant budgets and counting strategy      |
//! | `idempotency` | [`IdempotencyConfig`] | retention, in-progress timeout, hashing       |
//! | `identity`    | [`IdentityConfig`]    | identity collaborator, actor cache            |
//! | `business`    | [`BusinessConfig`]    | business-operation collaborator               |
//! | `guardrails`  | `GuardrailSettings`   | smart code grammar, tolerance, tier reporting |
//! | `maintenance` | [`MaintenanceConfig`] | sweep interval                                |
//!
//! # Failure Policy
//!
//! Admission and guardrails always fail closed. The rate limiter
//! (`rate_limit.fail_open`) and the idempotency manager
//! (`idempotency.fail_open`) fail open by default when their backing store
//! errors, and the admission filter admits at MEDIUM risk when a body cannot
//! be read for scanning (`admission.fail_open_on_body_read`).
//!
//! # Example
//!
//! ```no_run
//! use hera_config::ConfigLoader;
//!
//! # fn main() -> Result<(), hera_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("hera.toml")?
//!     .with_env_prefix("HERA")
//!     .load()?;
//!
//! println!("listening on {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! shutdown_timeout_secs = 30
//!
//! [rate_limit]
//! strategy = "sliding_window"
//! write_limit = 60
//!
//! [idempotency]
//! retention_minutes = 15
//!
//! [guardrails]
//! tier_reporting = "evaluated"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Variables use the format `PREFIX__SECTION__KEY`:
//!
//! - `HERA__SERVER__HTTP_ADDR=0.0.0.0:9000`
//! - `HERA__RATE_LIMIT__FAIL_OPEN=false`
//! - `HERA__RATE_LIMIT__PRIVILEGED_ROLES=platform_admin,system`

#![doc(html_root_url = "https://docs.rs/hera-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{GatewayConfig, MAX_RETENTION_MINUTES};
pub use error::ConfigError;
pub use hera_guardrails::{GuardrailSettings, TierReporting};
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::*;
