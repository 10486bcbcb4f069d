//! The entitlement decision point.
//!
//! Owns the [`EntitleableAttributes`] index for one policy snapshot and
//! answers entitlement and decision queries against it. Construction is the
//! only fallible phase for policy structure; afterwards the decision point is
//! immutable and safe to share across threads.

use std::collections::BTreeMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use keystone_types::{
    Action, AttributeDefinition, AttributeRuleType, EntityRepresentation, Resource, ResourceKind,
    SubjectMapping,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::attributes::{EntitleableAttributes, IndexedDefinition};
use crate::decision::{Decision, ResourceDecision};
use crate::error::{PdpError, Result};
use crate::evaluator::{DataRuleResult, EntitlementMap, evaluate_rule};
use crate::subject_mapping;

/// Entitlements of one entity: actions per attribute value FQN.
///
/// When the entity's resolution failed, `error` holds the reason and the map
/// is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEntitlements {
    pub entity_id: String,
    pub actions_per_attribute_value_fqn: BTreeMap<String, Arc<[Action]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Decides access for single entities over attribute-value resources.
#[derive(Debug, Clone)]
pub struct PolicyDecisionPoint {
    attributes: EntitleableAttributes,
}

impl PolicyDecisionPoint {
    /// Builds the decision point from a consistent policy snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PdpError::MissingRequiredPolicy`] when no definitions are
    /// supplied, or the first structural error found in the definitions or
    /// mappings.
    pub fn new(definitions: &[AttributeDefinition], mappings: &[SubjectMapping]) -> Result<Self> {
        if definitions.is_empty() {
            return Err(PdpError::MissingRequiredPolicy {
                what: "attribute definitions".to_string(),
            });
        }
        let attributes = EntitleableAttributes::build(definitions, mappings)?;
        info!(
            attribute_values = attributes.len(),
            subject_mappings = mappings.len(),
            "Policy decision point ready"
        );
        Ok(Self { attributes })
    }

    pub fn attributes(&self) -> &EntitleableAttributes {
        &self.attributes
    }

    // ========================================================================
    // Entitlements
    // ========================================================================

    /// Resolves the entitlements of every entity.
    ///
    /// When `matched_subject_mappings` is given the index is first narrowed
    /// to the values those mappings reference. With
    /// `with_comprehensive_hierarchy`, an entitlement on a hierarchy value
    /// also entitles every value ranked below it.
    ///
    /// An entity whose resolution fails is still listed, with its error set,
    /// and does not affect the others. Only cancellation and an unknown
    /// matched mapping fail the call.
    pub fn get_entitlements(
        &self,
        entities: &[EntityRepresentation],
        matched_subject_mappings: Option<&[SubjectMapping]>,
        with_comprehensive_hierarchy: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<EntityEntitlements>> {
        let filtered;
        let attributes = match matched_subject_mappings {
            Some(mappings) => {
                filtered = self.attributes.filter_by_subject_mappings(mappings)?;
                &filtered
            }
            None => &self.attributes,
        };

        let resolved = subject_mapping::resolve_many(attributes, entities, cancel)?;

        let entitlements = resolved
            .into_iter()
            .map(|(entity_id, outcome)| match outcome {
                Ok(entitled) => {
                    let entitled = if with_comprehensive_hierarchy {
                        expand_hierarchy_downward(&self.attributes, entitled)
                    } else {
                        entitled
                    };
                    EntityEntitlements {
                        entity_id,
                        actions_per_attribute_value_fqn: entitled.into_iter().collect(),
                        error: None,
                    }
                }
                Err(e) => EntityEntitlements {
                    entity_id,
                    actions_per_attribute_value_fqn: BTreeMap::new(),
                    error: Some(e.to_string()),
                },
            })
            .collect::<Vec<_>>();

        debug!(
            entities = entitlements.len(),
            failed = entitlements.iter().filter(|e| e.error.is_some()).count(),
            comprehensive = with_comprehensive_hierarchy,
            "Resolved entitlements"
        );
        Ok(entitlements)
    }

    // ========================================================================
    // Decisions
    // ========================================================================

    /// Decides whether `entity` may perform `action` on every resource.
    ///
    /// Obligations are not considered here; every result has
    /// `obligations_satisfied` set and `passed == entitled`.
    pub fn get_decision(
        &self,
        entity: &EntityRepresentation,
        action: &Action,
        resources: &[Resource],
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        validate_action(action)?;
        let requested = requested_value_fqns(resources)?;

        let decisionable = self
            .attributes
            .decisionable_subset(requested.iter().flat_map(|(_, fqns)| fqns.iter().copied()));
        let entitlements = subject_mapping::resolve(&decisionable, entity)?;

        let mut results = Vec::with_capacity(requested.len());
        for (resource_id, fqns) in &requested {
            if cancel.is_cancelled() {
                return Err(PdpError::Cancelled);
            }
            let data_rule_results = evaluate_resource(&decisionable, fqns, &entitlements, action)?;
            results.push(ResourceDecision::entitlement(*resource_id, data_rule_results));
        }

        let decision = Decision::new(results);
        debug!(
            entity_id = %entity.original_id,
            action = %action,
            resources = resources.len(),
            access = decision.access,
            "Decided access"
        );
        Ok(decision)
    }
}

/// Rejects actions without a name.
pub(crate) fn validate_action(action: &Action) -> Result<()> {
    if action.name.trim().is_empty() {
        return Err(PdpError::InvalidAction {
            reason: "action name is empty".to_string(),
        });
    }
    Ok(())
}

/// Pairs each resource id with its attribute value FQNs.
fn requested_value_fqns(resources: &[Resource]) -> Result<Vec<(&str, Vec<&str>)>> {
    if resources.is_empty() {
        return Err(PdpError::InvalidResource {
            resource_id: String::new(),
            reason: "at least one resource is required".to_string(),
        });
    }

    resources
        .iter()
        .map(|resource| match &resource.kind {
            ResourceKind::AttributeValues { fqns } if fqns.is_empty() => {
                Err(PdpError::InvalidResource {
                    resource_id: resource.ephemeral_id.clone(),
                    reason: "no attribute value FQNs".to_string(),
                })
            }
            ResourceKind::AttributeValues { fqns } => Ok((
                resource.ephemeral_id.as_str(),
                fqns.iter().map(String::as_str).collect(),
            )),
            ResourceKind::RegisteredResourceValueFqn(_) => Err(PdpError::NotImplemented {
                feature: "decisions on registered resource values".to_string(),
            }),
        })
        .collect()
}

/// Groups a resource's values by definition and evaluates each group.
fn evaluate_resource(
    decisionable: &EntitleableAttributes,
    fqns: &[&str],
    entitlements: &EntitlementMap,
    action: &Action,
) -> Result<Vec<DataRuleResult>> {
    let mut groups: Vec<(&Arc<IndexedDefinition>, Vec<&str>)> = Vec::new();
    for &fqn in fqns {
        let entry = decisionable
            .get(fqn)
            .ok_or_else(|| PdpError::FqnNotFound {
                fqn: fqn.to_string(),
            })?;
        match groups
            .iter_mut()
            .find(|(def, _)| Arc::ptr_eq(def, &entry.definition))
        {
            Some((_, members)) => members.push(fqn),
            None => groups.push((&entry.definition, vec![fqn])),
        }
    }

    groups
        .into_iter()
        .map(|(definition, members)| {
            evaluate_rule(definition, &members, entitlements, action).map_err(|source| {
                PdpError::FailedEvaluation {
                    definition_fqn: definition.fqn().to_string(),
                    action: action.name.clone(),
                    source,
                }
            })
        })
        .collect()
}

/// Copies hierarchy entitlements onto every lower value of the definition.
///
/// Lower values without entitlements share the higher value's action list.
/// Lower values that already have actions get the union.
fn expand_hierarchy_downward(
    attributes: &EntitleableAttributes,
    entitled: EntitlementMap,
) -> EntitlementMap {
    let mut expanded = entitled.clone();
    for (value_fqn, actions) in &entitled {
        let Some(entry) = attributes.get(value_fqn) else {
            continue;
        };
        if entry.definition.rule() != AttributeRuleType::Hierarchy {
            continue;
        }
        for lower in entry.definition.lower_than(value_fqn) {
            match expanded.entry(lower.fqn.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(actions));
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get();
                    if Arc::ptr_eq(existing, actions)
                        || actions.iter().all(|a| existing.contains(a))
                    {
                        continue;
                    }
                    let mut merged = existing.to_vec();
                    for action in actions.iter() {
                        if !merged.contains(action) {
                            merged.push(action.clone());
                        }
                    }
                    slot.insert(merged.into());
                }
            }
        }
    }
    expanded
}
