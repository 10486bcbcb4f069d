//! Kani proofs for rule evaluation
//!
//! These proofs check the rule families over small symbolic hierarchies
//! using bounded model checking.
//!
//! **Proof Count**: 4 proofs
//!
//! Run with: `cargo kani --tests --harness verify_*`

#[cfg(kani)]
use std::sync::Arc;

#[cfg(kani)]
use crate::attributes::IndexedDefinition;
#[cfg(kani)]
use crate::evaluator::{EntitlementMap, evaluate_rule};
#[cfg(kani)]
use keystone_types::{Action, AttributeDefinition, AttributeRuleType};

#[cfg(kani)]
const LEVELS: [&str; 4] = ["l0", "l1", "l2", "l3"];

#[cfg(kani)]
fn levels(rule: AttributeRuleType) -> IndexedDefinition {
    IndexedDefinition::unchecked(AttributeDefinition::new("example.com", "level", rule, &LEVELS))
}

#[cfg(kani)]
fn entitle(definition: &IndexedDefinition, index: usize) -> EntitlementMap {
    let mut map = EntitlementMap::new();
    let actions: Arc<[Action]> = Arc::from(vec![Action::read()]);
    map.insert(definition.values()[index].fqn.clone(), actions);
    map
}

/// Proof #1: Hierarchy elevation
///
/// **Property**: An entitlement at or above the requested value passes; one
/// strictly below fails.
///
/// **Verification**:
/// - Pick symbolic entitled and requested indexes
/// - Evaluate the hierarchy rule
/// - `passed` must equal `entitled <= requested`
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(6)]
fn verify_hierarchy_elevation() {
    let entitled: usize = kani::any();
    let requested: usize = kani::any();
    kani::assume(entitled < LEVELS.len());
    kani::assume(requested < LEVELS.len());

    let definition = levels(AttributeRuleType::Hierarchy);
    let entitlements = entitle(&definition, entitled);
    let resource = definition.values()[requested].fqn.clone();

    let result = evaluate_rule(&definition, &[resource.as_str()], &entitlements, &Action::read())
        .unwrap();

    assert_eq!(result.passed, entitled <= requested);
}

/// Proof #2: Evaluation determinism
///
/// **Property**: Same inputs always produce the same result
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(6)]
fn verify_evaluation_determinism() {
    let entitled: usize = kani::any();
    kani::assume(entitled < LEVELS.len());

    let definition = levels(AttributeRuleType::AllOf);
    let entitlements = entitle(&definition, entitled);
    let resource = definition.values()[0].fqn.clone();

    let first = evaluate_rule(&definition, &[resource.as_str()], &entitlements, &Action::read());
    let second = evaluate_rule(&definition, &[resource.as_str()], &entitlements, &Action::read());

    assert_eq!(first, second);
}

/// Proof #3: Unvalidated rules never pass
///
/// **Property**: Unspecified and unrecognized rules are errors, not denials
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(6)]
fn verify_unvalidated_rules_fail() {
    let unspecified: bool = kani::any();
    let rule = if unspecified {
        AttributeRuleType::Unspecified
    } else {
        AttributeRuleType::Unrecognized
    };

    let definition = levels(rule);
    let result = evaluate_rule(&definition, &[], &EntitlementMap::new(), &Action::read());

    assert!(result.is_err());
}

/// Proof #4: Empty resource lists pass vacuously
///
/// **Property**: With no requested values every validated rule passes,
/// whatever the entitlements
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(6)]
fn verify_vacuous_pass() {
    let family: u8 = kani::any();
    kani::assume(family < 3);
    let rule = match family {
        0 => AttributeRuleType::AllOf,
        1 => AttributeRuleType::AnyOf,
        _ => AttributeRuleType::Hierarchy,
    };
    let entitled: usize = kani::any();
    kani::assume(entitled < LEVELS.len());

    let definition = levels(rule);
    let entitlements = entitle(&definition, entitled);
    let result = evaluate_rule(&definition, &[], &entitlements, &Action::read()).unwrap();

    assert!(result.passed);
    assert!(result.entitlement_failures.is_empty());
}
