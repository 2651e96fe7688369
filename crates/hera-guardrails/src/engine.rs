//! The guardrails engine.

use crate::error::GuardrailError;
use crate::input::GuardrailInput;
use crate::result::{Finding, GuardrailResult, PendingFinding, RuleOutcome};
use crate::rule::{GuardrailRule, RuleEnv};
use crate::rules::CATALOGUE;
use crate::settings::{GuardrailSettings, TierReporting};
use hera_core::SecurityTier;
use regex::Regex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, warn};

/// Runs the fixed rule catalogue against a request.
///
/// Every rule runs on every request, so one response can list every problem.
/// A rule that returns an error or panics is reported as a
/// `RULE_EXECUTION_FAILED` violation attributed to that rule and does not stop
/// the pass.
///
/// # Example
///
/// ```rust
/// use hera_guardrails::{GuardrailInput, GuardrailsEngine};
/// use hera_core::{Actor, Membership, OperationClass, OrgContext};
/// use http::Method;
/// use serde_json::json;
///
/// let engine = GuardrailsEngine::with_defaults();
/// let actor = Actor::new("user-1", "u@example.com").with_membership(Membership::new("org-A", ["admin"]));
/// let org = OrgContext::from_membership(&actor.memberships[0]);
/// let payload = json!({ "organization_id": "org-B", "entity_data": { "entity_type": "CUSTOMER" } });
///
/// let result = engine.validate(&GuardrailInput {
///     actor: &actor,
///     org: &org,
///     method: &Method::POST,
///     path: "/api/v2/entities",
///     operation: "hera_entity_upsert_v2",
///     operation_class: OperationClass::Write,
///     payload: &payload,
/// });
/// assert!(!result.is_valid);
/// assert!(result.has_violation("ORG_FILTER_MISMATCH"));
/// ```
#[derive(Debug)]
pub struct GuardrailsEngine {
    rules: Vec<GuardrailRule>,
    env: RuleEnv,
}

impl GuardrailsEngine {
    /// Creates an engine with the full catalogue.
    pub fn new(settings: GuardrailSettings) -> Result<Self, GuardrailError> {
        Self::with_rules(settings, CATALOGUE.to_vec())
    }

    /// Creates an engine with default settings.
    #[must_use]
    pub fn with_defaults() -> Self {
        let settings = GuardrailSettings::default();
        let smart_code = Regex::new(&settings.smart_code_pattern)
            .unwrap_or_else(|_| unreachable!("default smart code pattern compiles"));
        Self {
            rules: CATALOGUE.to_vec(),
            env: RuleEnv {
                settings,
                smart_code,
            },
        }
    }

    /// Creates an engine over an explicit rule list.
    ///
    /// Used to exercise failure handling; production code should use
    /// [`GuardrailsEngine::new`].
    pub fn with_rules(
        settings: GuardrailSettings,
        rules: Vec<GuardrailRule>,
    ) -> Result<Self, GuardrailError> {
        let smart_code = Regex::new(&settings.smart_code_pattern)?;
        Ok(Self {
            rules,
            env: RuleEnv {
                settings,
                smart_code,
            },
        })
    }

    /// Returns the rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[GuardrailRule] {
        &self.rules
    }

    /// Returns the engine settings.
    #[must_use]
    pub fn settings(&self) -> &GuardrailSettings {
        &self.env.settings
    }

    /// Validates one request.
    #[must_use]
    pub fn validate(&self, input: &GuardrailInput<'_>) -> GuardrailResult {
        let started = Instant::now();
        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let mut evaluated_tier: Option<SecurityTier> = None;
        let mut violated_tier: Option<SecurityTier> = None;

        for rule in &self.rules {
            let outcome = self.run_rule(rule, input);
            evaluated_tier = evaluated_tier.max(Some(rule.tier));
            if !outcome.violations.is_empty() {
                violated_tier = violated_tier.max(Some(rule.tier));
            }
            violations.extend(outcome.violations.into_iter().map(|f| stamp(rule, f)));
            warnings.extend(outcome.warnings.into_iter().map(|f| stamp(rule, f)));
        }

        let security_tier = match self.env.settings.tier_reporting {
            TierReporting::Evaluated => evaluated_tier,
            TierReporting::Violated => violated_tier,
        }
        .unwrap_or(SecurityTier::Low);

        let duration = started.elapsed();
        debug!(
            rules = self.rules.len(),
            violations = violations.len(),
            warnings = warnings.len(),
            duration_us = duration.as_micros() as u64,
            "guardrail pass complete"
        );

        GuardrailResult {
            is_valid: violations.is_empty(),
            violations,
            warnings,
            rules_checked: self.rules.len(),
            validation_duration_ms: duration.as_secs_f64() * 1000.0,
            security_tier,
            highest_violated_tier: violated_tier,
        }
    }

    fn run_rule(&self, rule: &GuardrailRule, input: &GuardrailInput<'_>) -> RuleOutcome {
        let result = catch_unwind(AssertUnwindSafe(|| (rule.check)(input, &self.env)));
        let message = match result {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(err)) => err.message,
            Err(panic) => panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "rule panicked".to_string()),
        };
        warn!(rule = rule.name, error = %message, "guardrail rule failed");
        let mut outcome = RuleOutcome::pass();
        outcome.violation(
            "RULE_EXECUTION_FAILED",
            format!("rule '{}' failed: {message}", rule.name),
        );
        outcome
    }
}

fn stamp(rule: &GuardrailRule, pending: PendingFinding) -> Finding {
    Finding {
        rule: rule.name.to_string(),
        code: pending.code.to_string(),
        message: pending.message,
        tier: rule.tier,
        field: pending.field,
    }
}
