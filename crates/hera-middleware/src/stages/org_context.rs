//! Organization binding stage.
//!
//! Selects the tenant from `X-Organization-Id` when present, otherwise the
//! actor's first active membership, then checks the route's required
//! permissions against that membership.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, ContextField, Enrichment, Middleware};
use crate::types::Request;
use hera_core::{Actor, GatewayError, OrgContext, SecurityTier};
use hera_telemetry::StructuredLogger;
use std::sync::Arc;

/// Explicit tenant selector header.
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Binds the request to one organization.
#[derive(Debug)]
pub struct OrgContextStage {
    logger: Arc<StructuredLogger>,
}

impl OrgContextStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(logger: Arc<StructuredLogger>) -> Self {
        Self { logger }
    }

    fn bind(&self, actor: &Actor, request: &Request) -> Result<OrgContext, GatewayError> {
        let selector = request
            .headers()
            .get(ORGANIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let membership = match selector {
            Some(organization_id) => actor.active_membership(organization_id).ok_or_else(|| {
                GatewayError::authorization(
                    "ORG_ACCESS_DENIED",
                    format!("Actor has no active membership in organization {organization_id}"),
                )
            })?,
            None => actor.default_membership().ok_or_else(|| {
                GatewayError::authorization("NO_ORGANIZATION", "Actor has no active membership")
            })?,
        };
        Ok(OrgContext::from_membership(membership))
    }
}

impl Middleware for OrgContextStage {
    fn name(&self) -> &'static str {
        "org_context"
    }

    fn context_field(&self) -> ContextField {
        ContextField::OrgContext
    }

    fn process<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Enrichment, GatewayError>> {
        Box::pin(async move {
            let actor = ctx
                .actor()
                .ok_or_else(|| GatewayError::internal("org binding requires an actor"))?;

            let org = match self.bind(actor, request) {
                Ok(org) => org,
                Err(err) => {
                    self.logger.security(
                        &ctx.log_context(),
                        "tenant_access_denied",
                        SecurityTier::High,
                        serde_json::json!({
                            "code": err.code(),
                            "requested": request.headers().get(ORGANIZATION_HEADER).and_then(|v| v.to_str().ok()),
                        }),
                    );
                    return Err(err);
                }
            };

            let missing: Vec<&str> = ctx
                .route()
                .required_permissions
                .iter()
                .map(String::as_str)
                .filter(|p| !org.has_permission(p))
                .collect();
            if !missing.is_empty() {
                return Err(GatewayError::authorization(
                    "INSUFFICIENT_PERMISSIONS",
                    format!("Missing permission(s): {}", missing.join(", ")),
                ));
            }

            Ok(Enrichment::OrgContext(org))
        })
    }
}
