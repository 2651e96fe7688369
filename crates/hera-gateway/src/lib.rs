//! # HERA Gateway
//!
//! **Multi-tenant API gateway for the HERA business platform**
//!
//! Every request to the platform's business operations passes a fixed
//! admission-control pipeline before it reaches the backend:
//!
//! - **Perimeter admission**: size caps, per-source rate and concurrency,
//!   scanner and injection signatures, reputation blocks
//! - **Identity and tenancy**: bearer-token resolution, organization
//!   binding, route permissions
//! - **Guardrails**: tiered payload rules including organization fencing
//!   and ledger balance
//! - **Budgets and replay**: per-tenant rate limits and idempotent replay
//!   of mutating calls
//! - **Structured logging**: request records, security events, and a
//!   queryable in-memory buffer
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hera_gateway::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().with_defaults().load()?;
//!     Lifecycle::new(config)?.run(ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! Request → Admission → Route → Auth → OrgContext → Guardrails → RateLimit → Idempotency → Business
//!                                                                                            ↓
//! Response ← X-Request-ID / X-Response-Time ← completion record ←───────────────────────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/hera-gateway/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Shared types: errors, identity, clocks
pub use hera_core as core;

// Route table
pub use hera_router as router;

// Payload rules
pub use hera_guardrails as guardrails;

// Structured logger, tracing setup, metrics
pub use hera_telemetry as telemetry;

// Layered configuration
pub use hera_config as config;

// Pipeline stages and their stores
pub use hera_middleware as middleware;

// HTTP server, admission filter, lifecycle
pub use hera_server as server;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use hera_gateway::prelude::*;
///
/// let config = GatewayConfig::default();
/// let gateway = Gateway::builder(config).build().unwrap();
/// assert!(gateway.registry().len() > 0);
/// ```
pub mod prelude {
    pub use hera_config::{ConfigLoader, GatewayConfig};
    pub use hera_core::{Actor, GatewayError, Membership, OrgContext, SharedClock, SystemClock};
    pub use hera_middleware::{IdentityResolver, Middleware, Pipeline, Request, Response};
    pub use hera_router::{RouteDefinition, RouteRegistry};
    pub use hera_server::{
        BusinessClient, BusinessRequest, BusinessResponse, Gateway, Lifecycle, ShutdownSignal,
    };
    pub use hera_telemetry::StructuredLogger;
}
