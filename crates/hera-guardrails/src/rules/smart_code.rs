//! HIGH tier: smart code grammar.

use crate::error::RuleError;
use crate::input::GuardrailInput;
use crate::result::RuleOutcome;
use crate::rule::RuleEnv;
use crate::walk::for_each_field;
use serde_json::Value;

/// Every `smart_code` member at any depth must match the grammar. Each
/// offending field is reported separately.
pub(crate) fn smart_code_pattern(
    input: &GuardrailInput<'_>,
    env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::pass();
    for_each_field(input.payload, &mut |path, key, value| {
        if key != "smart_code" {
            return;
        }
        match value {
            Value::String(code) if env.smart_code.is_match(code) => {}
            Value::String(code) => outcome.field_violation(
                "SMART_CODE_INVALID",
                path,
                format!("{path} '{code}' does not match the smart code grammar"),
            ),
            other => outcome.field_violation(
                "SMART_CODE_INVALID",
                path,
                format!("{path} must be a string, got {other}"),
            ),
        }
    });
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{actor, env, input, org};
    use proptest::prelude::*;
    use serde_json::json;

    fn check(code: &str) -> bool {
        env().smart_code.is_match(code)
    }

    #[test]
    fn test_documented_examples() {
        assert!(check("HERA.ABC.DEF123.GHI_J.v2"));
        assert!(check("HERA.CRM.CUSTOMER.ENTITY.PROFILE.v1"));
        assert!(check("HERA.FIN.GL.TXN.JOURNAL.v12"));
        assert!(!check("hera.abc.def.v1"));
        assert!(!check("HERA.AB.CD.v1"));
        assert!(!check("HERA.A.B.C.1"));
        assert!(!check("HERA.CRM.CUSTOMER.v1"));
        assert!(!check("HERA.CRM.CUSTOMER.ENTITY.V1"));
    }

    #[test]
    fn test_two_segments_after_domain_is_the_minimum() {
        assert!(check("HERA.ABC.DEF123.GHI_J.v2"));
        assert!(check("HERA.CRM.CUSTOMER.ENTITY.v1"));
        assert!(!check("HERA.CRM.CUSTOMER.v1"));
        assert!(check("HERA.CRM.S1.S2.S3.S4.S5.S6.S7.S8.v1"));
        assert!(!check("HERA.CRM.S1.S2.S3.S4.S5.S6.S7.S8.S9.v1"));
    }

    #[test]
    fn test_reported_per_field() {
        let (a, o) = (actor(), org("org-A"));
        let payload = json!({
            "smart_code": "HERA.FIN.GL.TXN.JOURNAL.v1",
            "dynamic_fields": [
                { "field_name": "credit_limit", "smart_code": "bad" },
                { "field_name": "segment", "smart_code": "HERA.CRM.CUSTOMER.FIELD.SEGMENT.v1" }
            ],
            "lines": [
                { "smart_code": "hera.fin.gl.line.v1" },
                { "smart_code": 7 }
            ]
        });
        let outcome = smart_code_pattern(&input(&a, &o, &payload), &env()).unwrap();
        let mut fields: Vec<_> = outcome
            .violations
            .iter()
            .map(|v| v.field.clone().unwrap())
            .collect();
        fields.sort();
        assert_eq!(
            fields,
            vec![
                "dynamic_fields[0].smart_code",
                "lines[0].smart_code",
                "lines[1].smart_code"
            ]
        );
    }

    proptest! {
        #[test]
        fn generated_codes_are_accepted(
            domain in "[A-Z0-9]{3,15}",
            segments in prop::collection::vec("[A-Z0-9_]{2,30}", 2..=8),
            version in 0u32..1000,
        ) {
            let code = format!("HERA.{domain}.{}.v{version}", segments.join("."));
            prop_assert!(check(&code));
        }

        #[test]
        fn lowercase_prefix_is_rejected(rest in "[A-Z]{3}\\.[A-Z]{2}\\.[A-Z]{2}\\.v[0-9]") {
            let code = format!("hera.{rest}");
            prop_assert!(!check(&code));
        }
    }
}
