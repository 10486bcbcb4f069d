//! Rule evaluation.
//!
//! Checks one resource's values of a single definition against an entity's
//! entitlements for one action. The three rule families:
//!
//! - **all-of**: every resource value must be entitled with the action.
//! - **any-of**: at least one resource value must be entitled.
//! - **hierarchy**: some value ranked at or above the highest requested
//!   value must be entitled. Index 0 is the highest value.
//!
//! An empty resource value list passes under every family.

use std::collections::HashMap;
use std::sync::Arc;

use keystone_types::{Action, AttributeRuleType};
use serde::Serialize;
use thiserror::Error;

use crate::attributes::IndexedDefinition;

/// Entitled actions per attribute value FQN.
///
/// Action lists are shared between values after hierarchy expansion and are
/// never mutated once built.
pub type EntitlementMap = HashMap<String, Arc<[Action]>>;

/// Rule evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("attribute rule is unspecified")]
    UnspecifiedRule,

    #[error("attribute rule is not recognized")]
    UnrecognizedRule,
}

/// A resource value the entity lacks the requested action on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementFailure {
    pub attribute_value_fqn: String,
    pub action_name: String,
}

/// Outcome of evaluating one definition's rule for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRuleResult {
    pub passed: bool,
    pub rule: AttributeRuleType,
    pub definition_fqn: String,
    pub entitlement_failures: Vec<EntitlementFailure>,
}

/// Evaluates `definition`'s rule for `resource_value_fqns`.
///
/// All of `resource_value_fqns` are expected to belong to `definition`.
pub fn evaluate_rule(
    definition: &IndexedDefinition,
    resource_value_fqns: &[&str],
    entitlements: &EntitlementMap,
    action: &Action,
) -> Result<DataRuleResult, RuleError> {
    let failures = match definition.rule() {
        AttributeRuleType::AllOf => all_of(resource_value_fqns, entitlements, action),
        AttributeRuleType::AnyOf => any_of(resource_value_fqns, entitlements, action),
        AttributeRuleType::Hierarchy => {
            hierarchy(definition, resource_value_fqns, entitlements, action)
        }
        AttributeRuleType::Unspecified => return Err(RuleError::UnspecifiedRule),
        AttributeRuleType::Unrecognized => return Err(RuleError::UnrecognizedRule),
    };

    let passed = failures.is_none();
    tracing::trace!(
        definition = %definition.fqn(),
        rule = %definition.rule(),
        action = %action,
        passed,
        "Evaluated attribute rule"
    );

    Ok(DataRuleResult {
        passed,
        rule: definition.rule(),
        definition_fqn: definition.fqn().to_string(),
        entitlement_failures: failures.unwrap_or_default(),
    })
}

/// Returns true if `value_fqn` is entitled with `action`.
pub fn is_entitled(entitlements: &EntitlementMap, value_fqn: &str, action: &Action) -> bool {
    entitlements
        .get(value_fqn)
        .is_some_and(|actions| actions.iter().any(|a| a.same_name(action)))
}

fn missing(
    resource_value_fqns: &[&str],
    entitlements: &EntitlementMap,
    action: &Action,
) -> Vec<EntitlementFailure> {
    resource_value_fqns
        .iter()
        .filter(|fqn| !is_entitled(entitlements, fqn, action))
        .map(|fqn| EntitlementFailure {
            attribute_value_fqn: (*fqn).to_string(),
            action_name: action.name.clone(),
        })
        .collect()
}

// ============================================================================
// Rule Families
// ============================================================================
//
// Each returns `None` on pass and `Some(failures)` on fail.

fn all_of(
    resource_value_fqns: &[&str],
    entitlements: &EntitlementMap,
    action: &Action,
) -> Option<Vec<EntitlementFailure>> {
    let failures = missing(resource_value_fqns, entitlements, action);
    if failures.is_empty() {
        None
    } else {
        Some(failures)
    }
}

fn any_of(
    resource_value_fqns: &[&str],
    entitlements: &EntitlementMap,
    action: &Action,
) -> Option<Vec<EntitlementFailure>> {
    if resource_value_fqns.is_empty()
        || resource_value_fqns
            .iter()
            .any(|fqn| is_entitled(entitlements, fqn, action))
    {
        return None;
    }
    Some(missing(resource_value_fqns, entitlements, action))
}

fn hierarchy(
    definition: &IndexedDefinition,
    resource_value_fqns: &[&str],
    entitlements: &EntitlementMap,
    action: &Action,
) -> Option<Vec<EntitlementFailure>> {
    if resource_value_fqns.is_empty() {
        return None;
    }

    // Values unknown to the definition contribute no index.
    let target = resource_value_fqns
        .iter()
        .filter_map(|fqn| definition.index_of(fqn))
        .min();

    if let Some(target) = target {
        let elevated = definition.values()[..=target]
            .iter()
            .any(|value| is_entitled(entitlements, &value.fqn, action));
        if elevated {
            return None;
        }
    }

    Some(missing(resource_value_fqns, entitlements, action))
}
