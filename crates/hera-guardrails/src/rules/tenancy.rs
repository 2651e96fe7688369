//! CRITICAL tier: organization fencing, actor shape, platform protection.

use crate::error::RuleError;
use crate::input::GuardrailInput;
use crate::result::RuleOutcome;
use crate::rule::RuleEnv;
use crate::walk::for_each_field;
use hera_core::{MembershipKind, PLATFORM_ORGANIZATION_ID};
use serde_json::Value;

/// Payload members that name the acting user.
const ACTOR_FIELDS: &[&str] = &["actor_user_id", "created_by", "updated_by"];

const MAX_ACTOR_ID_LEN: usize = 128;

/// Every `organization_id` at any depth must equal the bound organization.
pub(crate) fn organization_boundary(
    input: &GuardrailInput<'_>,
    _env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let bound = input.org.organization_id.as_str();
    let mut outcome = RuleOutcome::pass();
    let mut declared = false;

    for_each_field(input.payload, &mut |path, key, value| {
        if key != "organization_id" {
            return;
        }
        declared = true;
        match value {
            Value::String(id) if id == bound => {}
            Value::String(id) => outcome.field_violation(
                "ORG_FILTER_MISMATCH",
                path,
                format!("{path} references organization '{id}' but the request is bound to '{bound}'"),
            ),
            other => outcome.field_violation(
                "ORG_FILTER_MISMATCH",
                path,
                format!("{path} must be a string organization id, got {other}"),
            ),
        }
    });

    if !declared && input.is_body_write() && input.payload.is_object() {
        outcome.warning(
            "ORG_ID_IMPLICIT",
            format!("payload does not declare organization_id; '{bound}' will be applied"),
        );
    }
    Ok(outcome)
}

/// The actor id must be well formed, belong to the bound organization, and
/// match any actor references in the payload.
pub(crate) fn actor_authentication(
    input: &GuardrailInput<'_>,
    _env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let actor = input.actor;
    let mut outcome = RuleOutcome::pass();

    let well_formed = !actor.id.is_empty()
        && actor.id.len() <= MAX_ACTOR_ID_LEN
        && actor.id.chars().all(|c| !c.is_whitespace() && !c.is_control());
    if !well_formed {
        outcome.violation("ACTOR_INVALID", "actor id is empty or malformed");
    }

    let member = actor
        .active_membership(&input.org.organization_id)
        .is_some();
    if !member && input.org.kind != MembershipKind::System {
        outcome.violation(
            "ACTOR_NOT_MEMBER",
            format!(
                "actor '{}' has no active membership in '{}'",
                actor.id, input.org.organization_id
            ),
        );
    }

    for_each_field(input.payload, &mut |path, key, value| {
        if !ACTOR_FIELDS.contains(&key) {
            return;
        }
        if let Value::String(referenced) = value {
            if referenced != &actor.id {
                outcome.field_violation(
                    "ACTOR_IDENTITY_MISMATCH",
                    path,
                    format!("{path} names '{referenced}' but the caller is '{}'", actor.id),
                );
            }
        }
    });
    Ok(outcome)
}

/// The reserved platform organization is reachable only by system actors
/// running allow-listed operations.
pub(crate) fn platform_protection(
    input: &GuardrailInput<'_>,
    env: &RuleEnv,
) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::pass();
    let mut touches_platform = input.org.is_platform();
    for_each_field(input.payload, &mut |_, key, value| {
        if key.ends_with("organization_id") && value.as_str() == Some(PLATFORM_ORGANIZATION_ID) {
            touches_platform = true;
        }
    });
    if !touches_platform {
        return Ok(outcome);
    }

    let allowed = env
        .settings
        .platform_operations
        .iter()
        .any(|op| op == input.operation);
    if !allowed {
        outcome.violation(
            "PLATFORM_ORG_PROTECTED",
            format!(
                "operation '{}' may not touch the platform organization",
                input.operation
            ),
        );
    } else if !input.actor.is_system() {
        outcome.violation(
            "PLATFORM_ORG_PROTECTED",
            "only system actors may operate on the platform organization",
        );
    }
    Ok(outcome)
}
