//! The fixed rule catalogue.
//!
//! Rules are listed from the most to the least severe tier. The engine runs
//! every rule on every request, in this order.

mod hints;
mod ledger;
mod relationship;
mod smart_code;
mod structure;
mod tenancy;

use crate::rule::GuardrailRule;
use hera_core::SecurityTier;

/// Every rule, in evaluation order.
pub static CATALOGUE: &[GuardrailRule] = &[
    GuardrailRule::new("organization_boundary", SecurityTier::Critical, tenancy::organization_boundary),
    GuardrailRule::new("actor_authentication", SecurityTier::Critical, tenancy::actor_authentication),
    GuardrailRule::new("platform_tenant_protection", SecurityTier::Critical, tenancy::platform_protection),
    GuardrailRule::new("smart_code_pattern", SecurityTier::High, smart_code::smart_code_pattern),
    GuardrailRule::new("ledger_balance", SecurityTier::High, ledger::ledger_balance),
    GuardrailRule::new("transaction_integrity", SecurityTier::High, ledger::transaction_integrity),
    GuardrailRule::new("relationship_shape", SecurityTier::High, relationship::relationship_shape),
    GuardrailRule::new("payload_structure", SecurityTier::Medium, structure::payload_structure),
    GuardrailRule::new("business_rules", SecurityTier::Medium, structure::business_rules),
    GuardrailRule::new("field_data_types", SecurityTier::Medium, structure::field_data_types),
    GuardrailRule::new("field_format", SecurityTier::Low, hints::field_format),
    GuardrailRule::new("payload_size", SecurityTier::Low, hints::payload_size),
];

#[cfg(test)]
pub(crate) mod testing {
    use crate::input::GuardrailInput;
    use crate::rule::RuleEnv;
    use crate::settings::GuardrailSettings;
    use hera_core::{Actor, Membership, OperationClass, OrgContext};
    use http::Method;
    use regex::Regex;
    use serde_json::Value;

    pub(crate) static POST: Method = Method::POST;

    pub(crate) fn env() -> RuleEnv {
        let settings = GuardrailSettings::default();
        RuleEnv {
            smart_code: Regex::new(&settings.smart_code_pattern).unwrap(),
            settings,
        }
    }

    pub(crate) fn actor() -> Actor {
        Actor::new("user-1", "user@example.com")
            .with_membership(Membership::new("org-A", ["admin"]))
    }

    pub(crate) fn org(id: &str) -> OrgContext {
        OrgContext::from_membership(&Membership::new(id, ["admin"]))
    }

    pub(crate) fn input<'a>(
        actor: &'a Actor,
        org: &'a OrgContext,
        payload: &'a Value,
    ) -> GuardrailInput<'a> {
        GuardrailInput {
            actor,
            org,
            method: &POST,
            path: "/api/v2/entities",
            operation: "hera_entity_upsert_v2",
            operation_class: OperationClass::Write,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_is_ordered_by_tier() {
        let tiers: Vec<_> = CATALOGUE.iter().map(|r| r.tier).collect();
        let mut sorted = tiers.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(tiers, sorted);
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = CATALOGUE.iter().map(|r| r.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CATALOGUE.len());
    }
}
