//! # HERA Middleware
//!
//! The admission chain every routed request passes before a business
//! operation is dispatched.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → Auth → OrgContext → Guardrails → RateLimit → Idempotency → Handler
//!                                                            │            │
//!                                                 replay ◀───┘            ▼
//! Response ◀── idempotency finish ◀── rate-limit headers ◀────────── response
//! ```
//!
//! | Stage | Middleware      | Writes        | Failure                         |
//! |-------|-----------------|---------------|---------------------------------|
//! | 1     | [`AuthStage`]        | `actor`       | 401, 502/503/504 upstream |
//! | 2     | [`OrgContextStage`]  | `org_context` | 403                       |
//! | 3     | [`GuardrailsStage`]  | `guardrails`  | 400 with every violation  |
//! | 4     | [`RateLimitStage`]   | `rate_limit`  | 429 with `Retry-After`    |
//! | 5     | [`IdempotencyStage`] | `idempotency` | 409 while in progress     |
//!
//! ## Key Features
//!
//! - **Fixed order**: [`PipelineBuilder::build`] rejects stages that write
//!   their field out of admission order or write a field twice
//! - **Short circuit**: the first failing stage ends the chain; later
//!   stages never run and the handler never sees a partial context
//! - **Append-only context**: [`MiddlewareContext`] fields are set once and
//!   frozen into a [`RequestContext`] that always carries actor and org
//! - **Shared counters**: rate-limit and idempotency state live behind the
//!   [`RateLimitStore`] and [`IdempotencyStore`] traits, with in-process
//!   sharded-map implementations
//!
//! ## Example
//!
//! ```
//! use hera_middleware::{ContextField, Enrichment, FnMiddleware, Pipeline};
//! use hera_telemetry::{LoggerConfig, StructuredLogger};
//! use std::sync::Arc;
//!
//! let logger = Arc::new(StructuredLogger::new(LoggerConfig::default()));
//! let pipeline = Pipeline::builder(logger)
//!     .stage(FnMiddleware::new("channel", ContextField::Metadata, |_ctx, _req| {
//!         Ok(Enrichment::Metadata(vec![("channel".into(), "api".into())]))
//!     }))
//!     .build()
//!     .unwrap();
//! assert_eq!(pipeline.stage_count(), 1);
//! ```

#![doc(html_root_url = "https://docs.rs/hera-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod error;
pub mod idempotency;
pub mod identity;
pub mod middleware;
pub mod pipeline;
pub mod rate_limit;
pub mod stages;
pub mod types;

pub use context::{MiddlewareContext, RequestContext};
pub use error::{IdentityError, PipelineError, StoreError};
pub use idempotency::{
    BeginOutcome, CachedResponse, IdempotencyManager, IdempotencyOutcome, IdempotencyStore,
    KeySource, MemoryIdempotencyStore, REPLAY_HEADER,
};
pub use identity::{CacheStats, IdentityCache, IdentityResolver, StaticIdentityResolver};
pub use middleware::{BoxFuture, ContextField, Enrichment, FnMiddleware, Handler, Middleware};
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder};
pub use rate_limit::{
    BudgetClass, MemoryRateLimitStore, RateLimitDecision, RateLimitKey, RateLimitStore,
    RateLimiter, WindowSpec, WindowState,
};
pub use stages::{
    AuthStage, GuardrailsStage, IdempotencyStage, OrgContextStage, RateLimitStage,
    AUTHORIZATION_HEADER, ORGANIZATION_HEADER,
};
pub use types::{Request, Response, ResponseExt, JSON_CONTENT_TYPE};
