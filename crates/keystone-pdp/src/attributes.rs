//! The entitleable attribute index.
//!
//! Built once per policy snapshot, the index maps every attribute value FQN
//! to the value, its parent definition, and the subject mappings attached to
//! it. Decision and entitlement paths only ever read from this index.
//!
//! ```text
//! value FQN ──► EntitleableValue { value, definition ──► IndexedDefinition, subject_mappings }
//!                                                          └─ hierarchy order: FQN ──► index
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use keystone_types::{
    AttributeDefinition, AttributeRuleType, AttributeValue, ConditionBooleanType, SubjectMapping,
    SubjectMappingOperator, fqn,
};

use crate::error::{PdpError, Result};

// ============================================================================
// Indexed Definition
// ============================================================================

/// An attribute definition with its value order precomputed.
///
/// Index 0 is the highest value of a hierarchy.
#[derive(Debug)]
pub struct IndexedDefinition {
    definition: AttributeDefinition,
    order: HashMap<String, usize>,
}

impl IndexedDefinition {
    /// Validates `definition` and precomputes its value order.
    pub fn new(definition: AttributeDefinition) -> Result<Self> {
        validate_definition(&definition)?;
        let order = definition
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (v.fqn.clone(), i))
            .collect();
        Ok(Self { definition, order })
    }

    /// Indexes `definition` without validating it.
    #[cfg(any(test, kani))]
    pub(crate) fn unchecked(definition: AttributeDefinition) -> Self {
        let order = definition
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (v.fqn.clone(), i))
            .collect();
        Self { definition, order }
    }

    pub fn fqn(&self) -> &str {
        &self.definition.fqn
    }

    pub fn rule(&self) -> AttributeRuleType {
        self.definition.rule
    }

    pub fn definition(&self) -> &AttributeDefinition {
        &self.definition
    }

    pub fn values(&self) -> &[AttributeValue] {
        &self.definition.values
    }

    /// Returns the position of `value_fqn` in the definition, if present.
    pub fn index_of(&self, value_fqn: &str) -> Option<usize> {
        self.order.get(value_fqn).copied()
    }

    /// Values ranked strictly higher than `value_fqn` (lower index).
    pub fn higher_than(&self, value_fqn: &str) -> &[AttributeValue] {
        match self.index_of(value_fqn) {
            Some(idx) => &self.definition.values[..idx],
            None => &[],
        }
    }

    /// Values ranked strictly lower than `value_fqn` (higher index).
    pub fn lower_than(&self, value_fqn: &str) -> &[AttributeValue] {
        match self.index_of(value_fqn) {
            Some(idx) => &self.definition.values[idx + 1..],
            None => &[],
        }
    }
}

/// Checks the structural invariants of a definition.
pub fn validate_definition(definition: &AttributeDefinition) -> Result<()> {
    if definition.fqn.is_empty() {
        return Err(PdpError::InvalidAttributeDefinition {
            definition_fqn: definition.name.clone(),
            reason: "definition FQN is empty".to_string(),
        });
    }

    match definition.rule {
        AttributeRuleType::AllOf | AttributeRuleType::AnyOf | AttributeRuleType::Hierarchy => {}
        AttributeRuleType::Unspecified => {
            return Err(PdpError::MissingRequiredSpecifiedRule {
                definition_fqn: definition.fqn.clone(),
            });
        }
        AttributeRuleType::Unrecognized => {
            return Err(PdpError::UnrecognizedRule {
                definition_fqn: definition.fqn.clone(),
            });
        }
    }

    let mut seen = std::collections::HashSet::with_capacity(definition.values.len());
    for value in &definition.values {
        if !fqn::is_value_of(&definition.fqn, &value.fqn) {
            return Err(PdpError::InvalidAttributeDefinition {
                definition_fqn: definition.fqn.clone(),
                reason: format!("value FQN '{}' is not under the definition", value.fqn),
            });
        }
        if !seen.insert(value.fqn.as_str()) {
            return Err(PdpError::InvalidAttributeDefinition {
                definition_fqn: definition.fqn.clone(),
                reason: format!("value FQN '{}' appears more than once", value.fqn),
            });
        }
    }

    Ok(())
}

/// Checks the structural invariants of a subject mapping.
///
/// An empty action list is accepted: such a mapping fires but grants nothing.
pub fn validate_subject_mapping(mapping: &SubjectMapping) -> Result<()> {
    if mapping.attribute_value.is_none() {
        return Err(PdpError::InvalidSubjectMapping {
            mapping_id: mapping.id.clone(),
            reason: "attribute value is missing".to_string(),
        });
    }
    if mapping.value_fqn().is_none() {
        return Err(PdpError::InvalidSubjectMapping {
            mapping_id: mapping.id.clone(),
            reason: "attribute value FQN is empty".to_string(),
        });
    }
    if mapping.actions.is_none() {
        return Err(PdpError::InvalidSubjectMapping {
            mapping_id: mapping.id.clone(),
            reason: "actions are missing".to_string(),
        });
    }

    let groups = mapping
        .subject_condition_set
        .iter()
        .flat_map(|set| &set.subject_sets)
        .flat_map(|subject_set| &subject_set.condition_groups);
    for group in groups {
        if group.boolean_operator == ConditionBooleanType::Unspecified {
            return Err(PdpError::InvalidSubjectMapping {
                mapping_id: mapping.id.clone(),
                reason: "condition group has an unspecified boolean operator".to_string(),
            });
        }
        if let Some(condition) = group
            .conditions
            .iter()
            .find(|c| c.operator == SubjectMappingOperator::Unspecified)
        {
            return Err(PdpError::InvalidSubjectMapping {
                mapping_id: mapping.id.clone(),
                reason: format!(
                    "condition on '{}' has an unspecified operator",
                    condition.subject_external_selector_value
                ),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Entitleable Attributes
// ============================================================================

/// An attribute value with its parent definition and attached mappings.
#[derive(Debug)]
pub struct EntitleableValue {
    pub value: AttributeValue,
    pub definition: Arc<IndexedDefinition>,
    pub subject_mappings: Vec<SubjectMapping>,
}

/// Index from attribute value FQN to [`EntitleableValue`].
#[derive(Debug, Default, Clone)]
pub struct EntitleableAttributes {
    values: HashMap<String, Arc<EntitleableValue>>,
    definitions: HashMap<String, Arc<IndexedDefinition>>,
}

impl EntitleableAttributes {
    /// Builds the index from one consistent list of definitions and mappings.
    ///
    /// Every definition and every mapping is validated; the first violation
    /// rejects the whole snapshot. Condition sets sharing a non-empty id are
    /// interned so that the resolver can memoise them by identity.
    pub fn build(definitions: &[AttributeDefinition], mappings: &[SubjectMapping]) -> Result<Self> {
        let mut index_definitions = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            let indexed = Arc::new(IndexedDefinition::new(definition.clone())?);
            match index_definitions.entry(indexed.fqn().to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(indexed);
                }
                Entry::Occupied(slot) => {
                    return Err(PdpError::InvalidAttributeDefinition {
                        definition_fqn: slot.key().clone(),
                        reason: "definition FQN appears more than once".to_string(),
                    });
                }
            }
        }

        let mut attached: HashMap<String, Vec<SubjectMapping>> = HashMap::new();
        let mut interned = HashMap::new();
        for mapping in mappings {
            validate_subject_mapping(mapping)?;
            let mut mapping = mapping.clone();
            if let Some(set) = mapping.subject_condition_set.as_mut() {
                if !set.id.is_empty() {
                    let shared = Arc::clone(
                        interned
                            .entry(set.id.clone())
                            .or_insert_with(|| Arc::clone(set)),
                    );
                    *set = shared;
                }
            }
            let value_fqn = mapping.value_fqn().unwrap_or_default().to_string();
            attached.entry(value_fqn).or_default().push(mapping);
        }

        let mut values = HashMap::new();
        for definition in index_definitions.values() {
            for value in definition.values() {
                let subject_mappings = attached.remove(&value.fqn).unwrap_or_default();
                values.insert(
                    value.fqn.clone(),
                    Arc::new(EntitleableValue {
                        value: value.clone(),
                        definition: Arc::clone(definition),
                        subject_mappings,
                    }),
                );
            }
        }

        // Mappings whose value is not listed on a definition still attach to
        // the parent definition named by their FQN.
        for (value_fqn, subject_mappings) in attached {
            let definition_fqn =
                fqn::definition_of(&value_fqn).ok_or_else(|| PdpError::DefinitionNotFound {
                    fqn: value_fqn.clone(),
                })?;
            let definition = index_definitions.get(definition_fqn).ok_or_else(|| {
                PdpError::DefinitionNotFound {
                    fqn: value_fqn.clone(),
                }
            })?;
            let value = subject_mappings
                .first()
                .and_then(|m| m.attribute_value.clone())
                .unwrap_or_else(|| AttributeValue::new("", value_fqn.clone()));
            values.insert(
                value_fqn,
                Arc::new(EntitleableValue {
                    value,
                    definition: Arc::clone(definition),
                    subject_mappings,
                }),
            );
        }

        tracing::debug!(
            definitions = index_definitions.len(),
            values = values.len(),
            mappings = mappings.len(),
            "Built entitleable attribute index"
        );

        Ok(Self {
            values,
            definitions: index_definitions,
        })
    }

    pub fn get(&self, value_fqn: &str) -> Option<&Arc<EntitleableValue>> {
        self.values.get(value_fqn)
    }

    pub fn definition(&self, definition_fqn: &str) -> Option<&Arc<IndexedDefinition>> {
        self.definitions.get(definition_fqn)
    }

    pub fn values(&self) -> impl Iterator<Item = (&String, &Arc<EntitleableValue>)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Restricts the index to the values referenced by `mappings`, carrying
    /// only those mappings.
    ///
    /// A mapping that names a value unknown to the index is rejected.
    pub fn filter_by_subject_mappings(&self, mappings: &[SubjectMapping]) -> Result<Self> {
        let mut attached: HashMap<&str, Vec<SubjectMapping>> = HashMap::new();
        for mapping in mappings {
            validate_subject_mapping(mapping)?;
            let value_fqn = mapping.value_fqn().unwrap_or_default();
            if !self.values.contains_key(value_fqn) {
                return Err(PdpError::FqnNotFound {
                    fqn: value_fqn.to_string(),
                });
            }
            attached.entry(value_fqn).or_default().push(mapping.clone());
        }

        let mut values = HashMap::with_capacity(attached.len());
        for (value_fqn, subject_mappings) in attached {
            let existing = &self.values[value_fqn];
            values.insert(
                value_fqn.to_string(),
                Arc::new(EntitleableValue {
                    value: existing.value.clone(),
                    definition: Arc::clone(&existing.definition),
                    subject_mappings,
                }),
            );
        }

        Ok(Self {
            values,
            definitions: self.definitions.clone(),
        })
    }

    /// Projects the index onto the values a decision needs.
    ///
    /// Each requested value is included, and for hierarchy definitions every
    /// value ranked above it is included as well, since an entitlement on a
    /// higher value satisfies the request. Unknown FQNs are skipped here and
    /// reported when resources are grouped.
    pub fn decisionable_subset<'a>(&self, value_fqns: impl IntoIterator<Item = &'a str>) -> Self {
        let mut values = HashMap::new();
        for value_fqn in value_fqns {
            let Some(entry) = self.values.get(value_fqn) else {
                continue;
            };
            values.insert(value_fqn.to_string(), Arc::clone(entry));

            if entry.definition.rule() == AttributeRuleType::Hierarchy {
                for higher in entry.definition.higher_than(value_fqn) {
                    if let Some(higher_entry) = self.values.get(&higher.fqn) {
                        values.insert(higher.fqn.clone(), Arc::clone(higher_entry));
                    }
                }
            }
        }

        Self {
            values,
            definitions: self.definitions.clone(),
        }
    }
}
