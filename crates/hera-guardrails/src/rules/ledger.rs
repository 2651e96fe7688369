//! HIGH tier: double-entry balance and transaction totals.

use crate::error::RuleError;
use crate::input::GuardrailInput;
use crate::result::RuleOutcome;
use crate::rule::RuleEnv;
use crate::walk::{as_amount, first_of};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

const LINE_KEYS: &[&str] = &["lines", "transaction_lines", "line_items"];
const SIDE_KEYS: &[&str] = &["side", "dr_cr", "debit_credit"];
const AMOUNT_KEYS: &[&str] = &["line_amount", "amount"];
const CURRENCY_KEYS: &[&str] = &["currency", "currency_code", "transaction_currency_code"];
const TOTAL_KEYS: &[&str] = &["total_amount"];

/// Segment of a smart code that marks a ledger line.
const LEDGER_SEGMENT: &str = "GL";

/// Floating point slack added to the configured tolerance.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Debit,
    Credit,
}

fn parse_side(value: &Value) -> Option<Side> {
    match value.as_str()?.trim().to_ascii_uppercase().as_str() {
        "DR" | "DEBIT" => Some(Side::Debit),
        "CR" | "CREDIT" => Some(Side::Credit),
        _ => None,
    }
}

/// The transaction object: `payload.transaction` when present, else the
/// payload itself.
fn transaction(payload: &Value) -> &Value {
    payload
        .get("transaction")
        .filter(|t| t.is_object())
        .unwrap_or(payload)
}

/// Returns the line array and the key it was found under.
fn lines(payload: &Value) -> Option<(&'static str, &Value)> {
    first_of(payload, LINE_KEYS).or_else(|| first_of(transaction(payload), LINE_KEYS))
}

/// Reads a member directly on the line or inside its `line_data`.
fn line_member<'a>(line: &'a Value, keys: &[&'static str]) -> Option<&'a Value> {
    first_of(line, keys)
        .or_else(|| line.get("line_data").and_then(|d| first_of(d, keys)))
        .map(|(_, v)| v)
}

fn is_ledger_line(line: &Value) -> bool {
    line.get("smart_code")
        .and_then(Value::as_str)
        .is_some_and(|code| code.split('.').any(|segment| segment == LEDGER_SEGMENT))
}

fn default_currency(payload: &Value) -> String {
    first_of(transaction(payload), CURRENCY_KEYS)
        .or_else(|| first_of(payload, CURRENCY_KEYS))
        .and_then(|(_, v)| v.as_str())
        .map_or_else(|| "UNSPECIFIED".to_string(), str::to_ascii_uppercase)
}

#[derive(Debug, Default)]
struct CurrencyTotals {
    debit: f64,
    credit: f64,
    lines: usize,
}

/// Within each currency, ledger debits must equal ledger credits.
pub(crate) fn ledger_balance(
    input: &GuardrailInput<'_>,
    env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::pass();
    let Some((key, Value::Array(items))) = lines(input.payload) else {
        return Ok(outcome);
    };

    let fallback_currency = default_currency(input.payload);
    let mut totals: BTreeMap<String, CurrencyTotals> = BTreeMap::new();

    for (i, line) in items.iter().enumerate() {
        if !is_ledger_line(line) {
            continue;
        }
        let path = format!("{key}[{i}]");
        let currency = line_member(line, CURRENCY_KEYS)
            .and_then(Value::as_str)
            .map_or_else(|| fallback_currency.clone(), str::to_ascii_uppercase);
        let entry = totals.entry(currency).or_default();
        entry.lines += 1;

        let side = line_member(line, SIDE_KEYS).and_then(parse_side);
        let amount = line_member(line, AMOUNT_KEYS).and_then(as_amount);

        let Some(side) = side else {
            outcome.field_violation(
                "GL_SIDE_MISSING",
                format!("{path}.side"),
                format!("{path} is a ledger line without a DR/CR side"),
            );
            continue;
        };
        let Some(amount) = amount else {
            outcome.field_violation(
                "GL_AMOUNT_INVALID",
                format!("{path}.line_amount"),
                format!("{path} is a ledger line without a numeric amount"),
            );
            continue;
        };
        if amount < 0.0 {
            outcome.field_violation(
                "GL_NEGATIVE_AMOUNT",
                format!("{path}.line_amount"),
                format!("{path} carries negative amount {amount}"),
            );
            continue;
        }
        match side {
            Side::Debit => entry.debit += amount,
            Side::Credit => entry.credit += amount,
        }
    }

    let tolerance = env.settings.balance_tolerance;
    for (currency, total) in &totals {
        if total.lines < 2 {
            outcome.warning(
                "GL_INSUFFICIENT_LINES",
                format!("{currency} has {} ledger line(s); double entry needs two", total.lines),
            );
        }
        if (total.debit - total.credit).abs() > tolerance + EPSILON {
            outcome.violation(
                "GL_NOT_BALANCED",
                format!(
                    "{currency} ledger lines do not balance: DR {:.2} vs CR {:.2}",
                    total.debit, total.credit
                ),
            );
        }
    }
    Ok(outcome)
}

/// The declared total must equal the sum of non-ledger line amounts, lines
/// must be an array, and line numbers must be unique.
pub(crate) fn transaction_integrity(
    input: &GuardrailInput<'_>,
    env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::pass();
    let txn = transaction(input.payload);

    let declared_total = match first_of(txn, TOTAL_KEYS) {
        None => None,
        Some((_, value)) => {
            let parsed = as_amount(value);
            if parsed.is_none() {
                outcome.field_violation(
                    "TXN_TOTAL_INVALID",
                    "total_amount",
                    format!("total_amount must be numeric, got {value}"),
                );
            }
            parsed
        }
    };

    let items = match lines(input.payload) {
        None => return Ok(outcome),
        Some((_, Value::Array(items))) => items,
        Some((key, _)) => {
            outcome.field_violation("TXN_LINES_INVALID", key, format!("{key} must be an array"));
            return Ok(outcome);
        }
    };

    let mut business_sum = 0.0;
    let mut business_lines = 0usize;
    let mut seen_numbers = HashSet::new();
    for (i, line) in items.iter().enumerate() {
        if let Some(number) = line.get("line_number").and_then(Value::as_i64) {
            if !seen_numbers.insert(number) {
                outcome.field_warning(
                    "TXN_DUPLICATE_LINE_NUMBER",
                    format!("lines[{i}].line_number"),
                    format!("line_number {number} appears more than once"),
                );
            }
        }
        if is_ledger_line(line) {
            continue;
        }
        business_lines += 1;
        match line_member(line, AMOUNT_KEYS).map(|v| (v, as_amount(v))) {
            Some((_, Some(amount))) => business_sum += amount,
            Some((raw, None)) => outcome.field_violation(
                "TXN_LINE_AMOUNT_INVALID",
                format!("lines[{i}].line_amount"),
                format!("line amount must be numeric, got {raw}"),
            ),
            None => {}
        }
    }

    if let Some(total) = declared_total {
        if business_lines > 0 && (total - business_sum).abs() > env.settings.balance_tolerance + EPSILON {
            outcome.violation(
                "TXN_TOTAL_MISMATCH",
                format!("total_amount {total:.2} does not equal line total {business_sum:.2}"),
            );
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{actor, env, input, org};
    use proptest::prelude::*;
    use serde_json::json;

    fn gl_line(side: &str, amount: f64, currency: &str) -> Value {
        json!({
            "smart_code": "HERA.FIN.GL.TXN.LINE.v1",
            "side": side,
            "line_amount": amount,
            "currency": currency,
        })
    }

    fn balance(payload: &Value) -> RuleOutcome {
        let (a, o) = (actor(), org("org-A"));
        ledger_balance(&input(&a, &o, payload), &env()).unwrap()
    }

    fn integrity(payload: &Value) -> RuleOutcome {
        let (a, o) = (actor(), org("org-A"));
        transaction_integrity(&input(&a, &o, payload), &env()).unwrap()
    }

    #[test]
    fn test_balanced_lines() {
        let payload = json!({
            "lines": [gl_line("DR", 100.0, "USD"), gl_line("CR", 100.0, "USD")]
        });
        assert!(balance(&payload).is_clean());
    }

    #[test]
    fn test_unbalanced_lines() {
        let payload = json!({
            "lines": [gl_line("DR", 100.0, "USD"), gl_line("CR", 90.0, "USD")]
        });
        let outcome = balance(&payload);
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].code, "GL_NOT_BALANCED");
    }

    #[test]
    fn test_tolerance() {
        let payload = json!({
            "lines": [gl_line("DR", 100.0, "USD"), gl_line("CR", 99.995, "USD")]
        });
        assert!(balance(&payload).violations.is_empty());
        let payload = json!({
            "lines": [gl_line("DR", 100.0, "USD"), gl_line("CR", 99.98, "USD")]
        });
        assert_eq!(balance(&payload).violations.len(), 1);
    }

    #[test]
    fn test_grouped_by_currency() {
        let payload = json!({
            "lines": [
                gl_line("DR", 100.0, "USD"),
                gl_line("CR", 100.0, "EUR"),
            ]
        });
        let outcome = balance(&payload);
        assert_eq!(outcome.violations.len(), 2);
        assert_eq!(outcome.warnings.len(), 2);
        assert!(outcome.warnings.iter().all(|w| w.code == "GL_INSUFFICIENT_LINES"));
    }

    #[test]
    fn test_single_zero_line_is_warning_only() {
        let payload = json!({ "lines": [gl_line("DR", 0.0, "USD")] });
        let outcome = balance(&payload);
        assert!(outcome.violations.is_empty());
        assert_eq!(outcome.warnings[0].code, "GL_INSUFFICIENT_LINES");
    }

    #[test]
    fn test_missing_side_and_negative_amount() {
        let payload = json!({
            "lines": [
                { "smart_code": "HERA.FIN.GL.TXN.LINE.v1", "line_amount": 10, "currency": "USD" },
                gl_line("CR", -10.0, "USD"),
            ]
        });
        let codes: Vec<_> = balance(&payload).violations.iter().map(|v| v.code).collect();
        assert!(codes.contains(&"GL_SIDE_MISSING"));
        assert!(codes.contains(&"GL_NEGATIVE_AMOUNT"));
    }

    #[test]
    fn test_side_in_line_data_and_transaction_currency() {
        let payload = json!({
            "transaction": { "transaction_currency_code": "usd" },
            "lines": [
                { "smart_code": "HERA.FIN.GL.TXN.LINE.v1", "line_amount": "50", "line_data": { "side": "debit" } },
                { "smart_code": "HERA.FIN.GL.TXN.LINE.v1", "line_amount": 50, "line_data": { "side": "credit" } },
            ]
        });
        assert!(balance(&payload).is_clean());
    }

    #[test]
    fn test_non_ledger_lines_ignored_by_balance() {
        let payload = json!({
            "lines": [{ "smart_code": "HERA.SALON.SVC.LINE.HAIRCUT.v1", "line_amount": 40 }]
        });
        assert!(balance(&payload).is_clean());
    }

    #[test]
    fn test_total_matches_business_lines() {
        let payload = json!({
            "total_amount": 60,
            "lines": [
                { "smart_code": "HERA.SALON.SVC.LINE.HAIRCUT.v1", "line_amount": 40 },
                { "smart_code": "HERA.SALON.SVC.LINE.COLOR.v1", "line_amount": 20 },
                gl_line("DR", 60.0, "USD"),
                gl_line("CR", 60.0, "USD"),
            ]
        });
        assert!(integrity(&payload).violations.is_empty());
    }

    #[test]
    fn test_total_mismatch() {
        let payload = json!({
            "transaction": { "total_amount": 100 },
            "lines": [{ "smart_code": "HERA.SALON.SVC.LINE.HAIRCUT.v1", "line_amount": 40 }]
        });
        assert_eq!(integrity(&payload).violations[0].code, "TXN_TOTAL_MISMATCH");
    }

    #[test]
    fn test_total_with_only_ledger_lines_is_not_compared() {
        let payload = json!({
            "total_amount": 100,
            "lines": [gl_line("DR", 100.0, "USD"), gl_line("CR", 100.0, "USD")]
        });
        assert!(integrity(&payload).violations.is_empty());
    }

    #[test]
    fn test_lines_must_be_array() {
        let payload = json!({ "lines": { "0": {} } });
        assert_eq!(integrity(&payload).violations[0].code, "TXN_LINES_INVALID");
    }

    #[test]
    fn test_duplicate_line_numbers_warn() {
        let payload = json!({
            "lines": [
                { "line_number": 1, "line_amount": 1 },
                { "line_number": 1, "line_amount": 1 }
            ]
        });
        let outcome = integrity(&payload);
        assert!(outcome.violations.is_empty());
        assert_eq!(outcome.warnings[0].code, "TXN_DUPLICATE_LINE_NUMBER");
    }

    proptest! {
        #[test]
        fn balance_is_order_independent(
            cents in prop::collection::vec(1u32..1_000_000, 1..12),
            seed in any::<u64>(),
        ) {
            let total: u64 = cents.iter().map(|c| u64::from(*c)).sum();
            let mut lines: Vec<Value> = cents
                .iter()
                .map(|c| gl_line("DR", f64::from(*c) / 100.0, "USD"))
                .collect();
            lines.push(gl_line("CR", total as f64 / 100.0, "USD"));

            let forward = balance(&json!({ "lines": lines.clone() }));
            let rotate = usize::try_from(seed % lines.len() as u64).unwrap();
            lines.reverse();
            lines.rotate_left(rotate);
            let shuffled = balance(&json!({ "lines": lines }));

            prop_assert!(forward.violations.is_empty());
            prop_assert_eq!(forward.violations.len(), shuffled.violations.len());
        }

        #[test]
        fn unbalanced_beyond_tolerance_is_rejected(
            amount_cents in 100u32..1_000_000,
            skew_cents in 2u32..10_000,
        ) {
            let dr = f64::from(amount_cents) / 100.0;
            let cr = f64::from(amount_cents + skew_cents) / 100.0;
            let outcome = balance(&json!({
                "lines": [gl_line("CR", cr, "USD"), gl_line("DR", dr, "USD")]
            }));
            prop_assert!(outcome.violations.iter().any(|v| v.code == "GL_NOT_BALANCED"));
        }
    }
}
