//! The obligations decision point.
//!
//! Indexes obligation triggers by action and attribute value, then reports
//! which obligation values a request triggers and whether the enforcing PEP
//! can fulfil them.
//!
//! ```text
//! simple:  action ──► attribute value FQN ──► [obligation value FQN]
//! scoped:  client id ──► action ──► attribute value FQN ──► [obligation value FQN]
//! ```
//!
//! Triggers on registered resource values are expanded when the index is
//! built into the attribute values the registered value binds to the
//! trigger's action, so both trigger kinds share one lookup space.

use std::collections::{HashMap, HashSet};

use keystone_types::{
    Action, Obligation, ObligationTrigger, RegisteredResource, RegisteredResourceValue,
    RequestContext, Resource, ResourceKind, TriggerTarget,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{PdpError, Result};
use crate::pdp::validate_action;

type TriggerIndex = HashMap<String, HashMap<String, Vec<String>>>;

/// Obligations triggered on one resource, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceObligations {
    pub resource_id: String,
    pub obligation_value_fqns: Vec<String>,
}

impl ResourceObligations {
    /// Returns true if every triggered obligation is in `fulfillable`.
    pub fn fulfilled_by(&self, fulfillable: &HashSet<&str>) -> bool {
        self.obligation_value_fqns
            .iter()
            .all(|fqn| fulfillable.contains(fqn.as_str()))
    }
}

/// Obligations triggered by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredObligations {
    /// One entry per requested resource, in request order.
    pub per_resource: Vec<ResourceObligations>,
    /// Deduplicated union across resources.
    pub all: Vec<String>,
}

/// Decides which obligations apply to a request.
#[derive(Debug, Clone, Default)]
pub struct ObligationsPdp {
    simple: TriggerIndex,
    scoped: HashMap<String, TriggerIndex>,
    registered_values: HashMap<String, RegisteredResourceValue>,
}

impl ObligationsPdp {
    /// Builds the trigger indexes.
    ///
    /// # Errors
    ///
    /// - [`PdpError::EmptyPepClientId`] if a trigger is scoped to an empty client id
    /// - [`PdpError::UnknownRegisteredResourceValue`] if a trigger names an
    ///   unregistered value
    pub fn new(obligations: &[Obligation], registered_resources: &[RegisteredResource]) -> Result<Self> {
        let registered_values: HashMap<String, RegisteredResourceValue> = registered_resources
            .iter()
            .flat_map(|rr| rr.values_by_fqn().map(|(fqn, v)| (fqn, v.clone())))
            .collect();

        let mut pdp = Self {
            simple: TriggerIndex::new(),
            scoped: HashMap::new(),
            registered_values,
        };

        let mut trigger_count = 0usize;
        for obligation in obligations {
            for value in &obligation.values {
                for trigger in &value.triggers {
                    pdp.index_trigger(&value.fqn, trigger)?;
                    trigger_count += 1;
                }
            }
        }

        debug!(
            triggers = trigger_count,
            scoped_clients = pdp.scoped.len(),
            registered_values = pdp.registered_values.len(),
            "Indexed obligation triggers"
        );
        Ok(pdp)
    }

    fn index_trigger(&mut self, obligation_value_fqn: &str, trigger: &ObligationTrigger) -> Result<()> {
        let attribute_value_fqns: Vec<String> = match &trigger.target {
            TriggerTarget::AttributeValue(fqn) => vec![fqn.clone()],
            TriggerTarget::RegisteredResourceValue(fqn) => self
                .registered_value(fqn)?
                .attribute_value_fqns_for(&trigger.action)
                .map(ToString::to_string)
                .collect(),
        };
        let action_key = trigger.action.key();

        if trigger.contexts.is_empty() {
            insert(&mut self.simple, &action_key, &attribute_value_fqns, obligation_value_fqn);
            return Ok(());
        }

        for context in &trigger.contexts {
            let client_id = context.client_id().ok_or_else(|| PdpError::EmptyPepClientId {
                obligation_value_fqn: obligation_value_fqn.to_string(),
            })?;
            let index = self.scoped.entry(client_id.to_string()).or_default();
            insert(index, &action_key, &attribute_value_fqns, obligation_value_fqn);
        }
        Ok(())
    }

    fn registered_value(&self, fqn: &str) -> Result<&RegisteredResourceValue> {
        self.registered_values
            .get(fqn)
            .ok_or_else(|| PdpError::UnknownRegisteredResourceValue {
                fqn: fqn.to_string(),
            })
    }

    /// Reports the obligations `action` on `resources` triggers.
    ///
    /// Unscoped triggers always apply. Scoped triggers apply only when
    /// `context` names their PEP client id.
    pub fn get_triggered_obligations(
        &self,
        action: &Action,
        resources: &[Resource],
        context: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<TriggeredObligations> {
        validate_action(action)?;
        if resources.is_empty() {
            return Err(PdpError::InvalidResource {
                resource_id: String::new(),
                reason: "at least one resource is required".to_string(),
            });
        }

        let action_key = action.key();
        let simple = self.simple.get(&action_key);
        let scoped = context
            .client_id()
            .and_then(|client| self.scoped.get(client))
            .and_then(|index| index.get(&action_key));

        let mut triggered = TriggeredObligations::default();
        let mut seen = HashSet::new();
        for resource in resources {
            if cancel.is_cancelled() {
                return Err(PdpError::Cancelled);
            }

            let mut obligation_value_fqns: Vec<String> = Vec::new();
            for value_fqn in self.resource_value_fqns(resource, action)? {
                let hits = [simple, scoped]
                    .into_iter()
                    .flatten()
                    .filter_map(|by_value| by_value.get(value_fqn))
                    .flatten();
                for fqn in hits {
                    if !obligation_value_fqns.contains(fqn) {
                        obligation_value_fqns.push(fqn.clone());
                    }
                }
            }

            for fqn in &obligation_value_fqns {
                if seen.insert(fqn.clone()) {
                    triggered.all.push(fqn.clone());
                }
            }
            triggered.per_resource.push(ResourceObligations {
                resource_id: resource.ephemeral_id.clone(),
                obligation_value_fqns,
            });
        }

        debug!(
            action = %action,
            client_id = context.client_id().unwrap_or_default(),
            resources = resources.len(),
            triggered = triggered.all.len(),
            "Computed triggered obligations"
        );
        Ok(triggered)
    }

    fn resource_value_fqns<'a>(
        &'a self,
        resource: &'a Resource,
        action: &'a Action,
    ) -> Result<Vec<&'a str>> {
        match &resource.kind {
            ResourceKind::AttributeValues { fqns } => Ok(fqns.iter().map(String::as_str).collect()),
            ResourceKind::RegisteredResourceValueFqn(fqn) => Ok(self
                .registered_value(fqn)?
                .attribute_value_fqns_for(action)
                .collect()),
        }
    }

    /// Returns true iff every triggered obligation is one the PEP declared it
    /// can fulfil.
    pub fn get_all_obligations_are_fulfilled(
        &self,
        triggered: &TriggeredObligations,
        pep_fulfillable: &[String],
        context: &RequestContext,
    ) -> bool {
        let fulfillable: HashSet<&str> = pep_fulfillable.iter().map(String::as_str).collect();
        let unfulfilled: Vec<&str> = triggered
            .all
            .iter()
            .map(String::as_str)
            .filter(|fqn| !fulfillable.contains(fqn))
            .collect();

        if !unfulfilled.is_empty() {
            debug!(
                client_id = context.client_id().unwrap_or_default(),
                unfulfilled = ?unfulfilled,
                "PEP cannot fulfil triggered obligations"
            );
        }
        unfulfilled.is_empty()
    }
}

fn insert(index: &mut TriggerIndex, action_key: &str, attribute_value_fqns: &[String], obligation_value_fqn: &str) {
    let by_value = index.entry(action_key.to_string()).or_default();
    for value_fqn in attribute_value_fqns {
        let obligations = by_value.entry(value_fqn.clone()).or_default();
        if !obligations.iter().any(|o| o == obligation_value_fqn) {
            obligations.push(obligation_value_fqn.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_types::{ActionAttributeValue, ObligationValue, fqn};

    fn value_a() -> String {
        fqn::attribute_value_fqn("example.com", "level", "a")
    }

    fn value_b() -> String {
        fqn::attribute_value_fqn("example.com", "level", "b")
    }

    fn obligation(name: &str, triggers: Vec<ObligationTrigger>) -> Obligation {
        Obligation {
            id: String::new(),
            name: name.to_string(),
            values: vec![ObligationValue::new(
                fqn::obligation_value_fqn("example.com", name, "required"),
                triggers,
            )],
        }
    }

    fn network() -> RegisteredResource {
        RegisteredResource {
            id: String::new(),
            name: "network".to_string(),
            values: vec![RegisteredResourceValue {
                value: "internal".to_string(),
                action_attribute_values: vec![ActionAttributeValue {
                    action: Action::read(),
                    attribute_value_fqn: value_a(),
                }],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn scoped_trigger_with_empty_client_is_rejected() {
        let trigger = ObligationTrigger::on_attribute_value(Action::read(), value_a()).scoped_to("");
        let result = ObligationsPdp::new(&[obligation("o1", vec![trigger])], &[]);
        assert!(matches!(result, Err(PdpError::EmptyPepClientId { .. })));
    }

    #[test]
    fn unknown_registered_trigger_is_rejected() {
        let trigger = ObligationTrigger::on_registered_resource_value(
            Action::read(),
            "https://reg_res/missing/value/x",
        );
        let result = ObligationsPdp::new(&[obligation("o1", vec![trigger])], &[]);
        assert!(matches!(result, Err(PdpError::UnknownRegisteredResourceValue { .. })));
    }

    #[test]
    fn action_names_ignore_case() {
        let pdp = ObligationsPdp::new(
            &[obligation("o1", vec![ObligationTrigger::on_attribute_value(Action::new("READ"), value_a())])],
            &[],
        )
        .unwrap();
        let triggered = pdp
            .get_triggered_obligations(
                &Action::new("Read"),
                &[Resource::attribute_values("r1", [value_a()])],
                &RequestContext::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(triggered.all.len(), 1);
    }

    #[test]
    fn registered_trigger_fires_on_bound_attribute_value() {
        let rr_fqn = "https://reg_res/network/value/internal";
        let pdp = ObligationsPdp::new(
            &[obligation("o1", vec![ObligationTrigger::on_registered_resource_value(Action::read(), rr_fqn)])],
            &[network()],
        )
        .unwrap();

        let direct = pdp
            .get_triggered_obligations(
                &Action::read(),
                &[Resource::attribute_values("r1", [value_a()])],
                &RequestContext::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(direct.per_resource[0].obligation_value_fqns.len(), 1);

        let via_registered = pdp
            .get_triggered_obligations(
                &Action::read(),
                &[Resource::registered("r2", rr_fqn)],
                &RequestContext::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(via_registered.all, direct.all);
    }

    #[test]
    fn unknown_registered_resource_is_an_error() {
        let pdp = ObligationsPdp::new(&[], &[]).unwrap();
        let result = pdp.get_triggered_obligations(
            &Action::read(),
            &[Resource::registered("r1", "https://reg_res/none/value/x")],
            &RequestContext::default(),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(PdpError::UnknownRegisteredResourceValue { .. })));
    }

    #[test]
    fn union_is_deduplicated() {
        let pdp = ObligationsPdp::new(
            &[obligation(
                "o1",
                vec![
                    ObligationTrigger::on_attribute_value(Action::read(), value_a()),
                    ObligationTrigger::on_attribute_value(Action::read(), value_b()),
                ],
            )],
            &[],
        )
        .unwrap();
        let triggered = pdp
            .get_triggered_obligations(
                &Action::read(),
                &[
                    Resource::attribute_values("r1", [value_a(), value_b()]),
                    Resource::attribute_values("r2", [value_b()]),
                ],
                &RequestContext::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(triggered.per_resource[0].obligation_value_fqns.len(), 1);
        assert_eq!(triggered.per_resource[1].obligation_value_fqns.len(), 1);
        assert_eq!(triggered.all.len(), 1);
    }

    #[test]
    fn fulfilment_is_a_subset_check() {
        let pdp = ObligationsPdp::default();
        let o1 = fqn::obligation_value_fqn("example.com", "o1", "required");
        let triggered = TriggeredObligations {
            per_resource: Vec::new(),
            all: vec![o1.clone()],
        };
        let ctx = RequestContext::default();

        assert!(pdp.get_all_obligations_are_fulfilled(&TriggeredObligations::default(), &[], &ctx));
        assert!(!pdp.get_all_obligations_are_fulfilled(&triggered, &[], &ctx));
        assert!(pdp.get_all_obligations_are_fulfilled(&triggered, &[o1, "extra".to_string()], &ctx));
    }

    #[test]
    fn rejects_empty_action_and_resources() {
        let pdp = ObligationsPdp::default();
        let ctx = RequestContext::default();
        let cancel = CancellationToken::new();
        assert!(matches!(
            pdp.get_triggered_obligations(&Action::new(""), &[Resource::attribute_values("r", [value_a()])], &ctx, &cancel),
            Err(PdpError::InvalidAction { .. })
        ));
        assert!(matches!(
            pdp.get_triggered_obligations(&Action::read(), &[], &ctx, &cancel),
            Err(PdpError::InvalidResource { .. })
        ));
    }
}
