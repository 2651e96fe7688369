//! # HERA Guardrails
//!
//! Multi-tier payload validation for the HERA gateway.
//!
//! Every authenticated, tenant-bound request passes through the
//! [`GuardrailsEngine`] before any business operation runs. The engine
//! evaluates a fixed catalogue of rules and never short-circuits, so a
//! rejected request reports every problem at once.
//!
//! ## Rule Catalogue
//!
//! | Tier       | Rule                         | Checks                                         |
//! |------------|------------------------------|------------------------------------------------|
//! | `CRITICAL` | `organization_boundary`      | every `organization_id` matches the bound org  |
//! | `CRITICAL` | `actor_authentication`       | actor is valid and a member of the bound org   |
//! | `CRITICAL` | `platform_tenant_protection` | platform tenant touched only by system actors  |
//! | `HIGH`     | `smart_code_pattern`         | every `smart_code` matches the grammar         |
//! | `HIGH`     | `ledger_balance`             | GL debits equal credits per currency           |
//! | `HIGH`     | `transaction_integrity`      | totals and line amounts are consistent         |
//! | `HIGH`     | `relationship_shape`         | relationships name source, target, and type    |
//! | `MEDIUM`   | `payload_structure`          | payload and known members have the right shape |
//! | `MEDIUM`   | `business_rules`             | entity types, names, and dates                 |
//! | `MEDIUM`   | `field_data_types`           | dynamic field values match their declared type |
//! | `LOW`      | `field_format`               | format hints for emails, codes, currencies     |
//! | `LOW`      | `payload_size`               | size hints for large or deep payloads          |
//!
//! `LOW` rules only emit warnings.

#![doc(html_root_url = "https://docs.rs/hera-guardrails/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod engine;
mod error;
mod input;
mod result;
mod rule;
mod rules;
mod settings;
mod walk;

pub use engine::GuardrailsEngine;
pub use error::{GuardrailError, RuleError};
pub use input::GuardrailInput;
pub use result::{Finding, GuardrailResult, PendingFinding, RuleOutcome};
pub use rule::{GuardrailRule, RuleEnv, RuleFn};
pub use rules::CATALOGUE;
pub use settings::{
    GuardrailSettings, TierReporting, DEFAULT_BALANCE_TOLERANCE, DEFAULT_SMART_CODE_PATTERN,
};
