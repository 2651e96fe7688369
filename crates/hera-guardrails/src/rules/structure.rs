//! MEDIUM tier: payload structure, domain rules, dynamic field types.

use crate::error::RuleError;
use crate::input::GuardrailInput;
use crate::result::RuleOutcome;
use crate::rule::RuleEnv;
use chrono::{DateTime, NaiveDate};
use serde_json::Value;

const MAX_ENTITY_NAME_LEN: usize = 255;

/// Members that must be objects when present.
const OBJECT_MEMBERS: &[&str] = &["entity_data", "transaction", "options"];

/// Members that must be arrays when present.
const ARRAY_MEMBERS: &[&str] = &["relationships", "dynamic_fields"];

fn entity_view(payload: &Value) -> &Value {
    payload
        .get("entity_data")
        .filter(|v| v.is_object())
        .unwrap_or(payload)
}

/// Body-carrying writes need a JSON object, and well-known members need the
/// right container type.
pub(crate) fn payload_structure(
    input: &GuardrailInput<'_>,
    _env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::pass();
    let payload = input.payload;

    if input.is_body_write() {
        match payload {
            Value::Null => {
                outcome.violation("PAYLOAD_MISSING", "request body is required");
                return Ok(outcome);
            }
            Value::Object(map) if map.is_empty() => {
                outcome.violation("PAYLOAD_EMPTY", "request body must not be empty");
                return Ok(outcome);
            }
            Value::Object(_) => {}
            _ => {
                outcome.violation("PAYLOAD_NOT_OBJECT", "request body must be a JSON object");
                return Ok(outcome);
            }
        }
    }

    for member in OBJECT_MEMBERS {
        if let Some(value) = payload.get(*member) {
            if !value.is_object() && !value.is_null() {
                outcome.field_violation(
                    "FIELD_STRUCTURE_INVALID",
                    *member,
                    format!("{member} must be an object"),
                );
            }
        }
    }
    for member in ARRAY_MEMBERS {
        if let Some(value) = payload.get(*member) {
            if !value.is_array() && !value.is_null() {
                outcome.field_violation(
                    "FIELD_STRUCTURE_INVALID",
                    *member,
                    format!("{member} must be an array"),
                );
            }
        }
    }
    Ok(outcome)
}

fn is_entity_type(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_date(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Entity types are upper snake case, names are bounded, dates parse, and
/// entity creation names its type.
pub(crate) fn business_rules(
    input: &GuardrailInput<'_>,
    _env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::pass();
    let entity = entity_view(input.payload);

    match entity.get("entity_type") {
        Some(Value::String(kind)) if is_entity_type(kind) => {}
        Some(Value::String(kind)) => outcome.field_violation(
            "ENTITY_TYPE_INVALID",
            "entity_data.entity_type",
            format!("entity_type '{kind}' must be upper snake case"),
        ),
        Some(other) if !other.is_null() => outcome.field_violation(
            "ENTITY_TYPE_INVALID",
            "entity_data.entity_type",
            "entity_type must be a string",
        ),
        _ => {
            let creating_entity = *input.method == http::Method::POST
                && input.path.ends_with("/entities");
            if creating_entity {
                outcome.field_violation(
                    "ENTITY_TYPE_REQUIRED",
                    "entity_data.entity_type",
                    "entity creation requires entity_type",
                );
            }
        }
    }

    if let Some(name) = entity.get("entity_name").and_then(Value::as_str) {
        if name.chars().count() > MAX_ENTITY_NAME_LEN {
            outcome.field_violation(
                "ENTITY_NAME_TOO_LONG",
                "entity_data.entity_name",
                format!("entity_name exceeds {MAX_ENTITY_NAME_LEN} characters"),
            );
        }
    }

    let txn = input
        .payload
        .get("transaction")
        .filter(|v| v.is_object())
        .unwrap_or(input.payload);
    if let Some(date) = txn.get("transaction_date") {
        if !date.as_str().is_some_and(is_date) {
            outcome.field_violation(
                "TXN_DATE_INVALID",
                "transaction_date",
                format!("transaction_date {date} is not an RFC 3339 timestamp or YYYY-MM-DD date"),
            );
        }
    }
    let creating_txn = *input.method == http::Method::POST && input.path.ends_with("/transactions");
    let has_lines = ["lines", "transaction_lines", "line_items"]
        .iter()
        .any(|k| input.payload.get(*k).or_else(|| txn.get(*k)).is_some_and(|v| !v.is_null()));
    if creating_txn && !has_lines {
        outcome.warning("TXN_NO_LINES", "transaction has no lines");
    }
    Ok(outcome)
}

/// Declared dynamic field types must agree with the supplied value.
pub(crate) fn field_data_types(
    input: &GuardrailInput<'_>,
    _env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::pass();
    let Some(Value::Array(fields)) = input.payload.get("dynamic_fields") else {
        return Ok(outcome);
    };

    for (i, field) in fields.iter().enumerate() {
        let path = format!("dynamic_fields[{i}]");
        if !field
            .get("field_name")
            .and_then(Value::as_str)
            .is_some_and(|n| !n.trim().is_empty())
        {
            outcome.field_violation(
                "FIELD_NAME_MISSING",
                format!("{path}.field_name"),
                format!("{path} has no field_name"),
            );
        }
        let Some(declared) = field.get("field_type").and_then(Value::as_str) else {
            continue;
        };
        let (value_key, accepts): (&str, fn(&Value) -> bool) = match declared {
            "text" => ("field_value_text", Value::is_string),
            "number" => ("field_value_number", |v| {
                v.is_number() || v.as_str().is_some_and(|s| s.parse::<f64>().is_ok())
            }),
            "boolean" => ("field_value_boolean", Value::is_boolean),
            "date" => ("field_value_date", |v| v.as_str().is_some_and(is_date)),
            "json" => ("field_value_json", |v| v.is_object() || v.is_array()),
            other => {
                outcome.field_violation(
                    "FIELD_TYPE_UNKNOWN",
                    format!("{path}.field_type"),
                    format!("unknown field_type '{other}'"),
                );
                continue;
            }
        };
        let value = field
            .get(value_key)
            .or_else(|| field.get("field_value"))
            .filter(|v| !v.is_null());
        if let Some(value) = value {
            if !accepts(value) {
                outcome.field_violation(
                    "FIELD_TYPE_MISMATCH",
                    format!("{path}.{value_key}"),
                    format!("{path} is declared {declared} but holds {value}"),
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
    use hera_core::OperationClass;
    use http::Method;
    use serde_json::json;

    static GET: Method = Method::GET;

    #[test]
    fn test_missing_body_on_write() {
        let (a, o) = (actor(), org("org-A"));
        let payload = Value::Null;
        let outcome = payload_structure(&input(&a, &o, &payload), &env()).unwrap();
        assert_eq!(outcome.violations[0].code, "PAYLOAD_MISSING");
    }

    #[test]
    fn test_null_body_on_read_is_fine() {
        let (a, o) = (actor(), org("org-A"));
        let payload = Value::Null;
        let mut i = input(&a, &o, &payload);
        i.method = &GET;
        i.operation_class = OperationClass::Read;
        assert!(payload_structure(&i, &env()).unwrap().is_clean());
    }

    #[test]
    fn test_container_types() {
        let (a, o) = (actor(), org("org-A"));
        let payload = json!({ "entity_data": [], "dynamic_fields": {} });
        let outcome = payload_structure(&input(&a, &o, &payload), &env()).unwrap();
        assert_eq!(outcome.violations.len(), 2);
    }

    #[test]
    fn test_array_body_rejected() {
        let (a, o) = (actor(), org("org-A"));
        let payload = json!([1, 2]);
        let outcome = payload_structure(&input(&a, &o, &payload), &env()).unwrap();
        assert_eq!(outcome.violations[0].code, "PAYLOAD_NOT_OBJECT");
    }

    #[test]
    fn test_entity_type_rules() {
        let (a, o) = (actor(), org("org-A"));
        let good = json!({ "entity_data": { "entity_type": "CUSTOMER" } });
        assert!(business_rules(&input(&a, &o, &good), &env()).unwrap().is_clean());

        let bad = json!({ "entity_data": { "entity_type": "customer" } });
        let outcome = business_rules(&input(&a, &o, &bad), &env()).unwrap();
        assert_eq!(outcome.violations[0].code, "ENTITY_TYPE_INVALID");

        let missing = json!({ "entity_data": { "entity_name": "Acme" } });
        let outcome = business_rules(&input(&a, &o, &missing), &env()).unwrap();
        assert_eq!(outcome.violations[0].code, "ENTITY_TYPE_REQUIRED");
    }

    #[test]
    fn test_transaction_date() {
        let (a, o) = (actor(), org("org-A"));
        for (date, ok) in [
            (json!("2026-01-31"), true),
            (json!("2026-01-31T10:00:00Z"), true),
            (json!("31/01/2026"), false),
            (json!(20260131), false),
        ] {
            let payload = json!({ "transaction": { "transaction_date": date }, "lines": [] });
            let mut i = input(&a, &o, &payload);
            i.path = "/api/v2/transactions";
            let outcome = business_rules(&i, &env()).unwrap();
            assert_eq!(outcome.violations.is_empty(), ok, "{payload}");
        }
    }

    #[test]
    fn test_dynamic_field_types() {
        let (a, o) = (actor(), org("org-A"));
        let payload = json!({
            "dynamic_fields": [
                { "field_name": "credit_limit", "field_type": "number", "field_value_number": 5000 },
                { "field_name": "vip", "field_type": "boolean", "field_value_boolean": "yes" },
                { "field_name": "since", "field_type": "date", "field_value": "2024-02-30" },
                { "field_type": "text", "field_value_text": "x" },
                { "field_name": "blob", "field_type": "binary" }
            ]
        });
        let outcome = field_data_types(&input(&a, &o, &payload), &env()).unwrap();
        let codes: Vec<_> = outcome.violations.iter().map(|v| v.code).collect();
        assert_eq!(
            codes,
            vec![
                "FIELD_TYPE_MISMATCH",
                "FIELD_TYPE_MISMATCH",
                "FIELD_NAME_MISSING",
                "FIELD_TYPE_UNKNOWN"
            ]
        );
    }
}
