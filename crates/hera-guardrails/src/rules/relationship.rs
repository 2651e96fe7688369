//! HIGH tier: relationship records.

use crate::error::RuleError;
use crate::input::GuardrailInput;
use crate::result::RuleOutcome;
use crate::rule::RuleEnv;
use crate::walk::first_of;
use serde_json::Value;

const SOURCE_KEYS: &[&str] = &["from_entity_id", "source_entity_id"];
const TARGET_KEYS: &[&str] = &["to_entity_id", "target_entity_id"];
const TYPE_KEYS: &[&str] = &["relationship_type"];

/// Collects `(path, record)` for every relationship the payload carries.
fn relationship_records<'a>(input: &GuardrailInput<'a>) -> Vec<(String, &'a Value)> {
    let payload = input.payload;
    let mut records = Vec::new();
    if let Some(Value::Array(items)) = payload.get("relationships") {
        for (i, item) in items.iter().enumerate() {
            records.push((format!("relationships[{i}]"), item));
        }
    }
    if let Some(item) = payload.get("relationship").filter(|v| v.is_object()) {
        records.push(("relationship".to_string(), item));
    }
    let relationship_route = input.path.contains("/relationships");
    if records.is_empty() && relationship_route && input.is_body_write() && payload.is_object() {
        records.push((String::new(), payload));
    }
    records
}

fn has_text(record: &Value, keys: &[&'static str]) -> bool {
    first_of(record, keys)
        .and_then(|(_, v)| v.as_str())
        .is_some_and(|s| !s.trim().is_empty())
}

fn member_path(base: &str, member: &str) -> String {
    if base.is_empty() {
        member.to_string()
    } else {
        format!("{base}.{member}")
    }
}

/// Relationships need a source, a target, and a type, and may only reference
/// the bound organization.
pub(crate) fn relationship_shape(
    input: &GuardrailInput<'_>,
    _env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::pass();
    let bound = input.org.organization_id.as_str();

    for (path, record) in relationship_records(input) {
        if !record.is_object() {
            outcome.field_violation(
                "RELATIONSHIP_INVALID",
                path.clone(),
                "relationship must be an object",
            );
            continue;
        }
        if !has_text(record, SOURCE_KEYS) {
            outcome.field_violation(
                "RELATIONSHIP_SOURCE_MISSING",
                member_path(&path, "from_entity_id"),
                "relationship is missing its source entity id",
            );
        }
        if !has_text(record, TARGET_KEYS) {
            outcome.field_violation(
                "RELATIONSHIP_TARGET_MISSING",
                member_path(&path, "to_entity_id"),
                "relationship is missing its target entity id",
            );
        }
        if !has_text(record, TYPE_KEYS) {
            outcome.field_violation(
                "RELATIONSHIP_TYPE_MISSING",
                member_path(&path, "relationship_type"),
                "relationship is missing its type",
            );
        }
        if let Some(org) = record.get("organization_id").and_then(Value::as_str) {
            if org != bound {
                outcome.field_violation(
                    "RELATIONSHIP_ORG_MISMATCH",
                    member_path(&path, "organization_id"),
                    format!("relationship belongs to '{org}', request is bound to '{bound}'"),
                );
            }
        }
        let source = first_of(record, SOURCE_KEYS).and_then(|(_, v)| v.as_str());
        let target = first_of(record, TARGET_KEYS).and_then(|(_, v)| v.as_str());
        if let (Some(source), Some(target)) = (source, target) {
            if source == target {
                outcome.field_warning(
                    "RELATIONSHIP_SELF_REFERENCE",
                    member_path(&path, "to_entity_id"),
                    format!("entity '{source}' is related to itself"),
                );
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{actor, env, input, org};
    use serde_json::json;

    fn run(path: &str, payload: &Value) -> RuleOutcome {
        let (a, o) = (actor(), org("org-A"));
        let mut i = input(&a, &o, payload);
        i.path = path;
        relationship_shape(&i, &env()).unwrap()
    }

    #[test]
    fn test_complete_relationship() {
        let payload = json!({
            "relationships": [{
                "from_entity_id": "e1",
                "to_entity_id": "e2",
                "relationship_type": "HAS_STATUS",
                "organization_id": "org-A"
            }]
        });
        assert!(run("/api/v2/entities", &payload).is_clean());
    }

    #[test]
    fn test_missing_members() {
        let payload = json!({ "relationships": [{ "from_entity_id": "e1" }] });
        let codes: Vec<_> = run("/api/v2/entities", &payload)
            .violations
            .iter()
            .map(|v| v.code)
            .collect();
        assert_eq!(
            codes,
            vec!["RELATIONSHIP_TARGET_MISSING", "RELATIONSHIP_TYPE_MISSING"]
        );
    }

    #[test]
    fn test_org_mismatch() {
        let payload = json!({
            "relationship": {
                "source_entity_id": "e1",
                "target_entity_id": "e2",
                "relationship_type": "PARENT_OF",
                "organization_id": "org-B"
            }
        });
        let outcome = run("/api/v2/entities", &payload);
        assert_eq!(outcome.violations[0].code, "RELATIONSHIP_ORG_MISMATCH");
        assert_eq!(
            outcome.violations[0].field.as_deref(),
            Some("relationship.organization_id")
        );
    }

    #[test]
    fn test_payload_is_relationship_on_relationship_route() {
        let payload = json!({ "organization_id": "org-A", "from_entity_id": "e1" });
        let outcome = run("/api/v2/relationships", &payload);
        assert_eq!(outcome.violations.len(), 2);
        assert_eq!(
            outcome.violations[0].field.as_deref(),
            Some("to_entity_id")
        );
    }

    #[test]
    fn test_self_reference_warns() {
        let payload = json!({
            "from_entity_id": "e1",
            "to_entity_id": "e1",
            "relationship_type": "LINKS"
        });
        let outcome = run("/api/v2/relationships", &payload);
        assert!(outcome.violations.is_empty());
        assert_eq!(outcome.warnings[0].code, "RELATIONSHIP_SELF_REFERENCE");
    }
}
