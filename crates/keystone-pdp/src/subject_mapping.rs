//! Subject mapping resolution.
//!
//! Turns an entity's claim documents into entitlements by evaluating every
//! subject mapping in the index against them.
//!
//! ```text
//! SubjectConditionSet = OR  over SubjectSets
//! SubjectSet          = AND over ConditionGroups
//! ConditionGroup      = AND | OR over Conditions (short-circuit)
//! Condition           = selector over claims, then IN | NOT_IN | IN_CONTAINS
//! ```
//!
//! Subject set and condition group outcomes are memoised per entity by
//! identity. Condition sets are interned when the index is built, so a set
//! shared by many mappings is evaluated once.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use keystone_types::{
    Action, Condition, ConditionBooleanType, ConditionGroup, EntityRepresentation, SubjectMapping,
    SubjectMappingOperator, SubjectSet,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::attributes::EntitleableAttributes;
use crate::error::{PdpError, Result};
use crate::evaluator::EntitlementMap;
use crate::selector::{Selector, claim_string};

/// Resolves the entitlements of one entity against `attributes`.
///
/// Actions are unioned per value and deduplicated by lowercased name. A
/// mapping that fires with an empty action list grants nothing.
pub fn resolve(
    attributes: &EntitleableAttributes,
    entity: &EntityRepresentation,
) -> Result<EntitlementMap> {
    let mut resolver = Resolver::new(entity);
    let mut entitlements = EntitlementMap::new();

    for (value_fqn, entry) in attributes.values() {
        let mut actions: Vec<Action> = Vec::new();
        for mapping in &entry.subject_mappings {
            if !resolver.mapping_fires(mapping)? {
                continue;
            }
            for action in mapping.actions.iter().flatten() {
                if !actions.iter().any(|a| a.same_name(action)) {
                    actions.push(action.clone());
                }
            }
        }
        if !actions.is_empty() {
            entitlements.insert(value_fqn.clone(), actions.into());
        }
    }

    tracing::debug!(
        entity_id = %entity.original_id,
        entitled_values = entitlements.len(),
        "Resolved subject mappings"
    );
    Ok(entitlements)
}

/// Resolves every entity in turn, returning `(entity id, outcome)` pairs in
/// input order.
///
/// A failure such as a malformed selector only fails that entity's outcome;
/// the other entities still resolve. Cancellation is checked before each
/// entity and fails the whole batch.
pub fn resolve_many(
    attributes: &EntitleableAttributes,
    entities: &[EntityRepresentation],
    cancel: &CancellationToken,
) -> Result<Vec<(String, Result<EntitlementMap>)>> {
    let mut resolved = Vec::with_capacity(entities.len());
    for entity in entities {
        if cancel.is_cancelled() {
            return Err(PdpError::Cancelled);
        }
        let outcome = resolve(attributes, entity);
        if let Err(e) = &outcome {
            tracing::warn!(entity_id = %entity.original_id, error = %e, "Entity resolution failed");
        }
        resolved.push((entity.original_id.clone(), outcome));
    }
    Ok(resolved)
}

// ============================================================================
// Resolver
// ============================================================================

struct Resolver<'a> {
    entity: &'a EntityRepresentation,
    subject_sets: HashMap<*const SubjectSet, bool>,
    condition_groups: HashMap<*const ConditionGroup, bool>,
    selectors: HashMap<String, Selector>,
}

impl<'a> Resolver<'a> {
    fn new(entity: &'a EntityRepresentation) -> Self {
        Self {
            entity,
            subject_sets: HashMap::new(),
            condition_groups: HashMap::new(),
            selectors: HashMap::new(),
        }
    }

    fn mapping_fires(&mut self, mapping: &SubjectMapping) -> Result<bool> {
        let Some(condition_set) = mapping.subject_condition_set.as_deref() else {
            return Ok(false);
        };
        for subject_set in &condition_set.subject_sets {
            if self.subject_set_matches(subject_set, mapping)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn subject_set_matches(&mut self, set: &SubjectSet, mapping: &SubjectMapping) -> Result<bool> {
        let key: *const SubjectSet = set;
        if let Some(&cached) = self.subject_sets.get(&key) {
            return Ok(cached);
        }

        let mut matched = true;
        for group in &set.condition_groups {
            if !self.condition_group_matches(group, mapping)? {
                matched = false;
                break;
            }
        }

        self.subject_sets.insert(key, matched);
        Ok(matched)
    }

    fn condition_group_matches(
        &mut self,
        group: &ConditionGroup,
        mapping: &SubjectMapping,
    ) -> Result<bool> {
        let key: *const ConditionGroup = group;
        if let Some(&cached) = self.condition_groups.get(&key) {
            return Ok(cached);
        }

        let matched = match group.boolean_operator {
            ConditionBooleanType::And => {
                let mut all = true;
                for condition in &group.conditions {
                    if !self.condition_matches(condition, mapping)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            ConditionBooleanType::Or => {
                let mut any = false;
                for condition in &group.conditions {
                    if self.condition_matches(condition, mapping)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            ConditionBooleanType::Unspecified => {
                return Err(PdpError::InvalidSubjectMapping {
                    mapping_id: mapping.id.clone(),
                    reason: "condition group has an unspecified boolean operator".to_string(),
                });
            }
        };

        self.condition_groups.insert(key, matched);
        Ok(matched)
    }

    fn condition_matches(&mut self, condition: &Condition, mapping: &SubjectMapping) -> Result<bool> {
        let operator = condition.operator;
        if operator == SubjectMappingOperator::Unspecified {
            return Err(PdpError::InvalidSubjectMapping {
                mapping_id: mapping.id.clone(),
                reason: format!(
                    "condition on '{}' has an unspecified operator",
                    condition.subject_external_selector_value
                ),
            });
        }

        let entity = self.entity;
        let selector = self.selector(&condition.subject_external_selector_value)?;
        let expected = &condition.subject_external_values;

        // One satisfying claim document is enough.
        Ok(entity.additional_props.iter().any(|doc| {
            let selected = selected_strings(selector, doc);
            match operator {
                SubjectMappingOperator::In => {
                    selected.iter().any(|s| expected.iter().any(|e| e == s))
                }
                SubjectMappingOperator::NotIn => {
                    !selected.iter().any(|s| expected.iter().any(|e| e == s))
                }
                SubjectMappingOperator::InContains => selected
                    .iter()
                    .any(|s| expected.iter().any(|e| s.contains(e.as_str()))),
                SubjectMappingOperator::Unspecified => false,
            }
        }))
    }

    fn selector(&mut self, expr: &str) -> Result<&Selector> {
        let entity = self.entity;
        match self.selectors.entry(expr.to_string()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let parsed = Selector::parse(expr).map_err(|source| PdpError::MalformedSelector {
                    entity_id: entity.original_id.clone(),
                    source,
                })?;
                Ok(slot.insert(parsed))
            }
        }
    }
}

fn selected_strings(selector: &Selector, doc: &Value) -> Vec<String> {
    selector
        .evaluate(doc)
        .into_iter()
        .filter_map(claim_string)
        .map(std::borrow::Cow::into_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use keystone_types::{AttributeDefinition, AttributeRuleType, AttributeValue, SubjectConditionSet};
    use serde_json::json;

    const ENGINEERING: &str = "https://example.com/attr/department/value/engineering";

    fn index_with(set: SubjectConditionSet, actions: Vec<Action>) -> EntitleableAttributes {
        let def = AttributeDefinition::new(
            "example.com",
            "department",
            AttributeRuleType::AnyOf,
            &["engineering", "finance"],
        );
        let mapping = SubjectMapping::new(
            AttributeValue::new("engineering", ENGINEERING),
            Arc::new(set),
            actions,
        )
        .with_id("sm-1");
        EntitleableAttributes::build(&[def], &[mapping]).unwrap()
    }

    fn single(condition: Condition) -> SubjectConditionSet {
        SubjectConditionSet::new(vec![SubjectSet {
            condition_groups: vec![ConditionGroup::new(ConditionBooleanType::And, vec![condition])],
        }])
    }

    fn entity(claims: Value) -> EntityRepresentation {
        EntityRepresentation::new("e-1", vec![claims])
    }

    #[test]
    fn in_operator_grants_actions() {
        let index = index_with(
            single(Condition::new(".department", SubjectMappingOperator::In, &["engineering"])),
            vec![Action::read(), Action::new("READ"), Action::create()],
        );
        let ents = resolve(&index, &entity(json!({"department": "engineering"}))).unwrap();
        let actions = &ents[ENGINEERING];
        assert_eq!(actions.len(), 2);
        assert!(actions.contains(&Action::read()));
    }

    #[test]
    fn claim_values_are_case_sensitive() {
        let index = index_with(
            single(Condition::new(".department", SubjectMappingOperator::In, &["engineering"])),
            vec![Action::read()],
        );
        let ents = resolve(&index, &entity(json!({"department": "Engineering"}))).unwrap();
        assert!(ents.is_empty());
    }

    #[test]
    fn not_in_requires_empty_intersection() {
        let index = index_with(
            single(Condition::new(".groups[]", SubjectMappingOperator::NotIn, &["contractors"])),
            vec![Action::read()],
        );
        let allowed = resolve(&index, &entity(json!({"groups": ["staff", "eng"]}))).unwrap();
        assert!(allowed.contains_key(ENGINEERING));

        let denied = resolve(&index, &entity(json!({"groups": ["staff", "contractors"]}))).unwrap();
        assert!(denied.is_empty());
    }

    #[test]
    fn in_contains_matches_substrings() {
        let index = index_with(
            single(Condition::new(".email", SubjectMappingOperator::InContains, &["@example.com"])),
            vec![Action::read()],
        );
        let ents = resolve(&index, &entity(json!({"email": "alice@example.com"}))).unwrap();
        assert!(ents.contains_key(ENGINEERING));
    }

    #[test]
    fn any_claim_document_may_satisfy() {
        let index = index_with(
            single(Condition::new(".department", SubjectMappingOperator::In, &["engineering"])),
            vec![Action::read()],
        );
        let multi = EntityRepresentation::new(
            "e-1",
            vec![json!({"department": "finance"}), json!({"department": "engineering"})],
        );
        assert!(resolve(&index, &multi).unwrap().contains_key(ENGINEERING));
    }

    #[test]
    fn empty_actions_grant_nothing() {
        let index = index_with(
            single(Condition::new(".department", SubjectMappingOperator::In, &["engineering"])),
            Vec::new(),
        );
        let ents = resolve(&index, &entity(json!({"department": "engineering"}))).unwrap();
        assert!(ents.is_empty());
    }

    #[test]
    fn malformed_selector_names_the_entity() {
        let index = index_with(
            single(Condition::new("department", SubjectMappingOperator::In, &["engineering"])),
            vec![Action::read()],
        );
        let err = resolve(&index, &entity(json!({"department": "engineering"}))).unwrap_err();
        assert!(matches!(err, PdpError::MalformedSelector { ref entity_id, .. } if entity_id == "e-1"));
    }

    #[test]
    fn unspecified_operator_is_rejected_when_indexing() {
        let def = AttributeDefinition::new(
            "example.com",
            "department",
            AttributeRuleType::AnyOf,
            &["engineering"],
        );
        let mapping = SubjectMapping::new(
            AttributeValue::new("engineering", ENGINEERING),
            Arc::new(single(Condition::new(".department", SubjectMappingOperator::Unspecified, &["x"]))),
            vec![Action::read()],
        )
        .with_id("sm-1");
        let err = EntitleableAttributes::build(&[def], &[mapping]).unwrap_err();
        assert!(matches!(err, PdpError::InvalidSubjectMapping { ref mapping_id, .. } if mapping_id == "sm-1"));
    }

    #[test]
    fn or_group_short_circuits_past_failures() {
        let set = SubjectConditionSet::new(vec![SubjectSet {
            condition_groups: vec![ConditionGroup::new(
                ConditionBooleanType::Or,
                vec![
                    Condition::new(".level", SubjectMappingOperator::In, &["senior"]),
                    Condition::new(".department", SubjectMappingOperator::In, &["engineering"]),
                ],
            )],
        }]);
        let index = index_with(set, vec![Action::read()]);
        let ents = resolve(&index, &entity(json!({"department": "engineering"}))).unwrap();
        assert!(ents.contains_key(ENGINEERING));
    }

    #[test]
    fn resolve_many_honours_cancellation() {
        let index = index_with(
            single(Condition::new(".department", SubjectMappingOperator::In, &["engineering"])),
            vec![Action::read()],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = resolve_many(&index, &[entity(json!({}))], &cancel);
        assert!(matches!(result, Err(PdpError::Cancelled)));
    }

    #[test]
    fn resolve_many_preserves_entity_order() {
        let index = index_with(
            single(Condition::new(".department", SubjectMappingOperator::In, &["engineering"])),
            vec![Action::read()],
        );
        let entities = vec![
            EntityRepresentation::new("alice", vec![json!({"department": "engineering"})]),
            EntityRepresentation::new("bob", vec![json!({"department": "finance"})]),
        ];
        let resolved = resolve_many(&index, &entities, &CancellationToken::new()).unwrap();
        assert_eq!(resolved[0].0, "alice");
        assert!(resolved[0].1.as_ref().unwrap().contains_key(ENGINEERING));
        assert_eq!(resolved[1].0, "bob");
        assert!(resolved[1].1.as_ref().unwrap().is_empty());
    }

    #[test]
    fn malformed_selector_fails_only_the_entity_reaching_it() {
        let set = SubjectConditionSet::new(vec![SubjectSet {
            condition_groups: vec![ConditionGroup::new(
                ConditionBooleanType::Or,
                vec![
                    Condition::new(".department", SubjectMappingOperator::In, &["engineering"]),
                    Condition::new(".a..b", SubjectMappingOperator::In, &["x"]),
                ],
            )],
        }]);
        let index = index_with(set, vec![Action::read()]);
        let entities = vec![
            EntityRepresentation::new("good", vec![json!({"department": "engineering"})]),
            EntityRepresentation::new("bad", vec![json!({"department": "finance"})]),
        ];

        let resolved = resolve_many(&index, &entities, &CancellationToken::new()).unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].1.as_ref().unwrap().contains_key(ENGINEERING));
        assert!(matches!(
            &resolved[1].1,
            Err(PdpError::MalformedSelector { entity_id, .. }) if entity_id == "bad"
        ));
    }
}
