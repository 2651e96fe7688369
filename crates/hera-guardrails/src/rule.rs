//! Rule records.

use crate::error::RuleError;
use crate::input::GuardrailInput;
use crate::result::RuleOutcome;
use crate::settings::GuardrailSettings;
use hera_core::SecurityTier;
use regex::Regex;

/// Shared, read-only resources rules may consult.
#[derive(Debug)]
pub struct RuleEnv {
    /// Engine settings.
    pub settings: GuardrailSettings,
    /// Compiled smart code grammar.
    pub smart_code: Regex,
}

/// Signature of a rule validator.
pub type RuleFn = fn(&GuardrailInput<'_>, &RuleEnv) -> Result<RuleOutcome, RuleError>;

/// A named validator with a fixed tier.
#[derive(Clone, Copy)]
pub struct GuardrailRule {
    /// Rule name, used to attribute findings.
    pub name: &'static str,
    /// Tier of every finding the rule produces.
    pub tier: SecurityTier,
    /// The validator.
    pub check: RuleFn,
}

impl GuardrailRule {
    /// Creates a rule record.
    #[must_use]
    pub const fn new(name: &'static str, tier: SecurityTier, check: RuleFn) -> Self {
        Self { name, tier, check }
    }
}

impl std::fmt::Debug for GuardrailRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailRule")
            .field("name", &self.name)
            .field("tier", &self.tier)
            .finish_non_exhaustive()
    }
}
