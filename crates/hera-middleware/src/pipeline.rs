//! Fixed-order admission pipeline.
//!
//! The pipeline runs its stages strictly in sequence and stops at the first
//! failure. Stage order is checked when the pipeline is built: every stage
//! writes one [`ContextField`], and the fields must appear in admission order
//! with no field written twice.
//!
//! ## Execution
//!
//! ```text
//! stage 1 ─▶ stage 2 ─▶ ... ─▶ stage N ─▶ freeze ─▶ replay | handler
//!    │          │                 │                      │
//!    └──────────┴── failure ──────┘                      ▼
//!                      │                         after hooks (N..1)
//!                      ▼
//!              error envelope ─▶ after hooks of completed stages
//! ```

use crate::context::MiddlewareContext;
use crate::error::PipelineError;
use crate::middleware::{ContextField, Handler, Middleware};
use crate::types::{Request, Response, ResponseExt};
use hera_core::GatewayError;
use hera_telemetry::StructuredLogger;
use std::sync::Arc;
use tracing::warn;

/// A type-erased stage.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The admission pipeline.
///
/// # Example
///
/// ```rust
/// use hera_middleware::{ContextField, Enrichment, FnMiddleware, Pipeline};
/// use hera_telemetry::{LoggerConfig, StructuredLogger};
/// use std::sync::Arc;
///
/// let logger = Arc::new(StructuredLogger::new(LoggerConfig::development()));
/// let pipeline = Pipeline::builder(logger)
///     .stage(FnMiddleware::new("channel", ContextField::Metadata, |_ctx, _req| {
///         Ok(Enrichment::Metadata(vec![("channel".into(), "api".into())]))
///     }))
///     .build()
///     .unwrap();
///
/// assert_eq!(pipeline.stage_names(), vec!["channel"]);
/// ```
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
    logger: Arc<StructuredLogger>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder(logger: Arc<StructuredLogger>) -> PipelineBuilder {
        PipelineBuilder::new(logger)
    }

    /// Runs a request through the chain and the handler.
    ///
    /// Never fails: every error becomes an error envelope response.
    pub async fn execute(
        &self,
        mut ctx: MiddlewareContext,
        request: Request,
        handler: &dyn Handler,
    ) -> Response {
        let mut completed = 0;

        for stage in &self.stages {
            let outcome = match stage.process(&ctx, &request).await {
                Ok(enrichment) if enrichment.field() != stage.context_field() => {
                    Err(GatewayError::internal(format!(
                        "stage `{}` wrote `{}` but declares `{}`",
                        stage.name(),
                        enrichment.field(),
                        stage.context_field()
                    )))
                }
                Ok(enrichment) => ctx.apply(enrichment),
                Err(err) => Err(err),
            };

            if let Err(err) = outcome {
                warn!(
                    request_id = %ctx.request_id(),
                    stage = stage.name(),
                    field = %stage.context_field(),
                    code = err.code(),
                    status = err.status_code().as_u16(),
                    "admission stage rejected request"
                );
                return self.reject(&ctx, &err, completed).await;
            }
            completed += 1;
        }

        self.annotate(&ctx);

        let frozen = match ctx.freeze() {
            Ok(frozen) => frozen,
            Err(err) => return self.reject(&ctx, &err, completed).await,
        };

        let replay = self.stages.iter().find_map(|stage| stage.respond(&frozen));
        let mut response = match replay {
            Some(response) => response,
            None => match handler.call(&frozen, request).await {
                Ok(response) => response,
                Err(err) => {
                    self.logger.error(&ctx.log_context(), &err);
                    Response::from_error(&err, &ctx.error_context())
                }
            },
        };

        self.run_after(&ctx, &mut response, completed).await;
        response
    }

    async fn reject(&self, ctx: &MiddlewareContext, err: &GatewayError, completed: usize) -> Response {
        self.annotate(ctx);
        self.logger.error(&ctx.log_context(), err);
        let mut response = Response::from_error(err, &ctx.error_context());
        self.run_after(ctx, &mut response, completed).await;
        response
    }

    fn annotate(&self, ctx: &MiddlewareContext) {
        if let Some(handle) = ctx.log_handle() {
            self.logger.annotate(handle, ctx.annotation());
        }
    }

    async fn run_after(&self, ctx: &MiddlewareContext, response: &mut Response, completed: usize) {
        for stage in self.stages[..completed].iter().rev() {
            stage.after(ctx, response).await;
        }
    }

    /// Returns the names of all stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Builder for constructing a [`Pipeline`].
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
    logger: Arc<StructuredLogger>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("stages", &self.stages.len())
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(logger: Arc<StructuredLogger>) -> Self {
        Self {
            stages: Vec::new(),
            logger,
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage<M: Middleware>(self, stage: M) -> Self {
        self.stage_arc(Arc::new(stage))
    }

    /// Appends a shared stage.
    #[must_use]
    pub fn stage_arc(mut self, stage: BoxedMiddleware) -> Self {
        self.stages.push(stage);
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a field is written twice or out of
    /// admission order. Metadata stages may appear anywhere.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let mut previous: Option<(&'static str, ContextField)> = None;
        let mut seen: Vec<(ContextField, &'static str)> = Vec::new();

        for stage in &self.stages {
            let field = stage.context_field();
            if field == ContextField::Metadata {
                continue;
            }
            if let Some(&(_, first)) = seen.iter().find(|(f, _)| *f == field) {
                return Err(PipelineError::DuplicateField {
                    field: field.as_str(),
                    first,
                    second: stage.name(),
                });
            }
            if let Some((_, prev)) = previous {
                if rank(field) < rank(prev) {
                    return Err(PipelineError::OutOfOrder {
                        stage: stage.name(),
                        field: field.as_str(),
                        previous: prev.as_str(),
                    });
                }
            }
            seen.push((field, stage.name()));
            previous = Some((stage.name(), field));
        }

        Ok(Pipeline {
            stages: self.stages,
            logger: self.logger,
        })
    }
}

const fn rank(field: ContextField) -> u8 {
    match field {
        ContextField::Actor => 0,
        ContextField::OrgContext => 1,
        ContextField::Guardrails => 2,
        ContextField::RateLimit => 3,
        ContextField::Idempotency => 4,
        ContextField::Metadata => u8::MAX,
    }
}
