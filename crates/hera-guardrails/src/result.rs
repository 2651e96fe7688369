//! Guardrail findings and the aggregated result.

use hera_core::SecurityTier;
use serde::{Deserialize, Serialize};

/// A single violation or warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Name of the rule that produced the finding.
    pub rule: String,
    /// Machine-readable code, e.g. `ORG_FILTER_MISMATCH`.
    pub code: String,
    /// Human-readable explanation.
    pub message: String,
    /// Tier of the producing rule.
    pub tier: SecurityTier,
    /// JSON path of the offending field, e.g. `lines[1].smart_code`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Findings returned by one rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    /// Findings that invalidate the request.
    pub violations: Vec<PendingFinding>,
    /// Findings that are reported but do not invalidate the request.
    pub warnings: Vec<PendingFinding>,
}

/// A finding before the engine stamps it with the rule name and tier.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFinding {
    /// Machine-readable code.
    pub code: &'static str,
    /// Human-readable explanation.
    pub message: String,
    /// JSON path of the offending field.
    pub field: Option<String>,
}

impl RuleOutcome {
    /// An outcome with no findings.
    #[must_use]
    pub fn pass() -> Self {
        Self::default()
    }

    /// Records a violation.
    pub fn violation(&mut self, code: &'static str, message: impl Into<String>) {
        self.violations.push(PendingFinding {
            code,
            message: message.into(),
            field: None,
        });
    }

    /// Records a violation attributed to a field path.
    pub fn field_violation(
        &mut self,
        code: &'static str,
        field: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.violations.push(PendingFinding {
            code,
            message: message.into(),
            field: Some(field.into()),
        });
    }

    /// Records a warning.
    pub fn warning(&mut self, code: &'static str, message: impl Into<String>) {
        self.warnings.push(PendingFinding {
            code,
            message: message.into(),
            field: None,
        });
    }

    /// Records a warning attributed to a field path.
    pub fn field_warning(
        &mut self,
        code: &'static str,
        field: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.warnings.push(PendingFinding {
            code,
            message: message.into(),
            field: Some(field.into()),
        });
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.warnings.is_empty()
    }
}

/// Aggregated result of a guardrail pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    /// `false` iff `violations` is non-empty.
    pub is_valid: bool,
    /// Every violation, ordered by rule.
    pub violations: Vec<Finding>,
    /// Every warning, ordered by rule.
    pub warnings: Vec<Finding>,
    /// Number of rules evaluated.
    pub rules_checked: usize,
    /// Wall time of the pass.
    pub validation_duration_ms: f64,
    /// Reported tier, see [`TierReporting`](crate::TierReporting).
    pub security_tier: SecurityTier,
    /// Highest tier among violated rules, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_violated_tier: Option<SecurityTier>,
}

impl GuardrailResult {
    /// Code of the most severe violation, used as the error code.
    #[must_use]
    pub fn primary_code(&self) -> Option<&str> {
        SecurityTier::descending()
            .into_iter()
            .find_map(|tier| self.violations.iter().find(|f| f.tier == tier))
            .map(|f| f.code.as_str())
    }

    /// Returns true if any violation carries `code`.
    #[must_use]
    pub fn has_violation(&self, code: &str) -> bool {
        self.violations.iter().any(|f| f.code == code)
    }

    /// Serializes the findings for an error envelope.
    #[must_use]
    pub fn to_details(&self) -> serde_json::Value {
        serde_json::json!({
            "violations": self.violations,
            "warnings": self.warnings,
            "rules_checked": self.rules_checked,
            "security_tier": self.security_tier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(code: &str, tier: SecurityTier) -> Finding {
        Finding {
            rule: "r".to_string(),
            code: code.to_string(),
            message: String::new(),
            tier,
            field: None,
        }
    }

    #[test]
    fn test_primary_code_prefers_highest_then_first() {
        let result = GuardrailResult {
            is_valid: false,
            violations: vec![
                finding("SMART_CODE_INVALID", SecurityTier::High),
                finding("ORG_FILTER_MISMATCH", SecurityTier::Critical),
                finding("ACTOR_NOT_MEMBER", SecurityTier::Critical),
            ],
            warnings: vec![],
            rules_checked: 3,
            validation_duration_ms: 0.1,
            security_tier: SecurityTier::Critical,
            highest_violated_tier: Some(SecurityTier::Critical),
        };
        assert_eq!(result.primary_code(), Some("ORG_FILTER_MISMATCH"));
    }

    #[test]
    fn test_outcome_builders() {
        let mut outcome = RuleOutcome::pass();
        assert!(outcome.is_clean());
        outcome.field_violation("X", "a.b", "bad");
        outcome.warning("Y", "meh");
        assert_eq!(outcome.violations[0].field.as_deref(), Some("a.b"));
        assert_eq!(outcome.warnings.len(), 1);
    }
}
