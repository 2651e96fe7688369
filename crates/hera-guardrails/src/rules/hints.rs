//! LOW tier: format and size hints. These rules only warn.

use crate::error::RuleError;
use crate::input::GuardrailInput;
use crate::result::RuleOutcome;
use crate::rule::RuleEnv;
use crate::walk::{depth, for_each_field};
use serde_json::Value;

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !value.chars().any(char::is_whitespace)
}

fn is_currency_code(value: &str) -> bool {
    value.len() == 3 && value.chars().all(|c| c.is_ascii_uppercase())
}

/// Email, code, and currency members should be well formed.
pub(crate) fn field_format(
    input: &GuardrailInput<'_>,
    _env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::pass();
    for_each_field(input.payload, &mut |path, key, value| {
        let Value::String(text) = value else {
            return;
        };
        if key.ends_with("email") && !looks_like_email(text) {
            outcome.field_warning("FIELD_FORMAT_EMAIL", path, format!("{path} is not an email address"));
        } else if key.ends_with("_code")
            && key != "smart_code"
            && !key.contains("currency")
            && text.chars().any(char::is_whitespace)
        {
            outcome.field_warning("FIELD_FORMAT_CODE", path, format!("{path} contains whitespace"));
        } else if key.contains("currency") && !is_currency_code(text) {
            outcome.field_warning(
                "FIELD_FORMAT_CURRENCY",
                path,
                format!("{path} '{text}' is not an ISO 4217 code"),
            );
        }
    });
    Ok(outcome)
}

/// Very large or deeply nested payloads are flagged for performance.
pub(crate) fn payload_size(
    input: &GuardrailInput<'_>,
    env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let settings = &env.settings;
    let mut outcome = RuleOutcome::pass();

    let line_count = ["lines", "transaction_lines", "line_items"]
        .iter()
        .filter_map(|k| input.payload.get(*k).and_then(Value::as_array))
        .map(Vec::len)
        .max()
        .unwrap_or(0);
    if line_count > settings.max_lines_hint {
        outcome.warning(
            "PAYLOAD_LARGE_LINE_SET",
            format!("{line_count} lines exceeds the recommended {}", settings.max_lines_hint),
        );
    }

    let nesting = depth(input.payload);
    if nesting > settings.max_depth_hint {
        outcome.warning(
            "PAYLOAD_DEEP_NESTING",
            format!("payload nests {nesting} levels deep"),
        );
    }

    let size = serde_json::to_vec(input.payload)
        .map_err(|e| RuleError::new(format!("payload could not be measured: {e}")))?
        .len();
    if size > settings.max_payload_bytes_hint {
        outcome.warning("PAYLOAD_LARGE", format!("payload is {size} bytes"));
    }
    Ok(outcome)
}
