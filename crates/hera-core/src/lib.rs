//! # HERA Core
//!
//! Core types shared by every crate of the HERA gateway.
//!
//! - [`GatewayError`] - Typed failure carrying category, code, status and headers
//! - [`ErrorCategory`] - The ten error classes with fixed severity and retryability
//! - [`RequestId`] - Correlation identifier echoed as `X-Request-ID`
//! - [`Actor`] / [`Membership`] - Resolved caller identity and organization memberships
//! - [`OrgContext`] - The organization bound to a single request
//! - [`OperationClass`] - READ / WRITE / FINANCE classification
//! - [`SecurityTier`] - LOW / MEDIUM / HIGH / CRITICAL scale
//! - [`Clock`] - Millisecond wall clock, swappable in tests

#![doc(html_root_url = "https://docs.rs/hera-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod backoff;
mod clock;
mod context;
mod error;
mod identity;
mod operation;
mod tier;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use context::{ErrorContext, RequestId};
pub use error::{ErrorCategory, ErrorDetail, ErrorEnvelope, GatewayError, GatewayResult};
pub use identity::{Actor, Membership, MembershipKind, OrgContext, PLATFORM_ORGANIZATION_ID};
pub use operation::OperationClass;
pub use tier::{RiskLevel, SecurityTier, Severity};
