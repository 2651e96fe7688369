//! # HERA Server
//!
//! The perimeter of the HERA gateway: the HTTP server, the admission
//! filter every request passes first, the business-operation
//! collaborator, and the lifecycle owner.
//!
//! ## Request Path
//!
//! ```text
//! TCP ─▶ Server (body cap, read timeout)
//!          │
//!          ▼
//!        Gateway ─▶ /health, /ready
//!          │
//!          ├─▶ AdmissionFilter::admit (head) ─▶ AdmissionFilter::scan (body)
//!          ├─▶ RouteRegistry (404 / 405 / 410)
//!          ├─▶ Pipeline: Auth → OrgContext → Guardrails → RateLimit → Idempotency
//!          └─▶ BusinessHandler ─▶ BusinessClient (bounded timeout)
//! ```
//!
//! ## Key Features
//!
//! - **Fail-closed admission**: nine checks with per-source scoring and
//!   exponentially growing blocks
//! - **Bounded collaborators**: identity and business calls always carry
//!   a timeout and surface retryable upstream errors
//! - **Graceful shutdown**: readiness fails, connections drain, sweeps
//!   stop, and the log sink is flushed
//!
//! ## Example
//!
//! ```
//! use hera_config::GatewayConfig;
//! use hera_server::{BusinessClient, BusinessRequest, Gateway, RecordingBusinessClient};
//! use std::sync::Arc;
//!
//! let business = Arc::new(RecordingBusinessClient::new());
//! let gateway = Gateway::builder(GatewayConfig::default())
//!     .business(business.clone())
//!     .build()
//!     .unwrap();
//! assert!(gateway.readiness().is_ready());
//! assert_eq!(business.invocations(), 0);
//! # let _ = BusinessRequest::new("hera_entity_read_v2", "user-1", "org-A", serde_json::Value::Null);
//! # fn _object_safe(_: &dyn BusinessClient) {}
//! ```

#![doc(html_root_url = "https://docs.rs/hera-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod admission;
pub mod business;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod health;
pub mod identity_http;
pub mod lifecycle;
pub mod server;
pub mod shutdown;
pub mod sweeper;

pub use admission::{AdmissionCheck, AdmissionFilter, AdmissionPermit, AdmissionRejection, AdmissionStats};
pub use business::{
    BusinessClient, BusinessRequest, BusinessResponse, HttpBusinessClient, RecordingBusinessClient,
};
pub use dispatch::BusinessHandler;
pub use error::{BusinessError, ServerError};
pub use gateway::{Gateway, GatewayBuilder, REQUEST_ID_HEADER, RESPONSE_TIME_HEADER};
pub use health::{HealthCheck, HealthStatus, ReadinessCheck, ReadinessStatus, HEALTH_PATH, READY_PATH};
pub use identity_http::HttpIdentityResolver;
pub use lifecycle::Lifecycle;
pub use server::{client_source, Server, METRICS_PATH};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
pub use sweeper::{SweepReport, Sweeper};
