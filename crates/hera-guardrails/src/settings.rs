//! Engine settings.

use serde::{Deserialize, Serialize};

/// Smart code grammar: `HERA`, a 3-15 character domain, two to eight
/// segments, and a `v<digits>` version.
///
/// Two segments is the floor because `HERA.ABC.DEF123.GHI_J.v2` is a
/// valid code.
pub const DEFAULT_SMART_CODE_PATTERN: &str =
    r"^HERA\.[A-Z0-9]{3,15}(\.[A-Z0-9_]{2,30}){2,8}\.v[0-9]+$";

/// Allowed absolute difference between debit and credit sums.
pub const DEFAULT_BALANCE_TOLERANCE: f64 = 0.01;

/// How the reported security tier of a pass is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierReporting {
    /// Highest tier among all evaluated rules.
    #[default]
    Evaluated,
    /// Highest tier among violated rules, `LOW` when nothing is violated.
    Violated,
}

/// Tunables of the guardrails engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardrailSettings {
    /// Reported tier semantics.
    pub tier_reporting: TierReporting,
    /// Smart code regex.
    pub smart_code_pattern: String,
    /// Ledger and total-amount tolerance.
    pub balance_tolerance: f64,
    /// Operations allowed to touch the platform organization.
    pub platform_operations: Vec<String>,
    /// Line count above which a size hint is emitted.
    pub max_lines_hint: usize,
    /// Nesting depth above which a size hint is emitted.
    pub max_depth_hint: usize,
    /// Serialized payload size above which a size hint is emitted.
    pub max_payload_bytes_hint: usize,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            tier_reporting: TierReporting::Evaluated,
            smart_code_pattern: DEFAULT_SMART_CODE_PATTERN.to_string(),
            balance_tolerance: DEFAULT_BALANCE_TOLERANCE,
            platform_operations: vec![
                "hera_org_membership_upsert_v2".to_string(),
                "hera_user_provision_v2".to_string(),
                "hera_entity_read_v2".to_string(),
            ],
            max_lines_hint: 500,
            max_depth_hint: 12,
            max_payload_bytes_hint: 256 * 1024,
        }
    }
}
