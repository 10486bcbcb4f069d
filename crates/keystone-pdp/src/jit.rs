//! The just-in-time decision point.
//!
//! Front door for callers: resolves the requesting entities, decides per
//! entity, consolidates across the chain, applies obligations, and audits.
//!
//! ```text
//! EntityIdentifier ──► EntityResolver ──► [EntityRepresentation]
//!                                              │ (environment entities skipped)
//!                                              ▼
//!                      PolicyDecisionPoint::get_decision per entity
//!                                              │
//!                                              ▼
//!                      consolidate ──► ObligationsPdp ──► AuditSink ──► Decision
//! ```

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use keystone_types::{Action, EntityIdentifier, EntityRepresentation, RequestContext, Resource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{AuditSink, DecisionAuditEvent, TracingAuditSink};
use crate::cache::PolicyCache;
use crate::decision::{Decision, consolidate};
use crate::entity::{ClaimsEntityResolver, EntityResolver};
use crate::error::{PdpError, Result};
use crate::obligations::ResourceObligations;
use crate::pdp::EntityEntitlements;
use crate::selector;
use crate::snapshot::PdpSet;
use crate::store::PolicyStore;

enum PdpSource {
    Cached(Arc<PolicyCache>),
    Fixed(Arc<PdpSet>),
}

/// Request-level decision point over a policy store.
pub struct JustInTimePdp {
    source: PdpSource,
    store: Arc<dyn PolicyStore>,
    resolver: Arc<dyn EntityResolver>,
    audit: Arc<dyn AuditSink>,
    skip_environment_entities: bool,
}

/// Builder for [`JustInTimePdp`].
#[derive(Default)]
pub struct JustInTimePdpBuilder {
    store: Option<Arc<dyn PolicyStore>>,
    cache: Option<Arc<PolicyCache>>,
    resolver: Option<Arc<dyn EntityResolver>>,
    audit: Option<Arc<dyn AuditSink>>,
    skip_environment_entities: Option<bool>,
}

impl JustInTimePdpBuilder {
    pub fn store(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Serves decisions from `cache` instead of a snapshot taken at build.
    pub fn cache(mut self, cache: Arc<PolicyCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Whether environment entities are left out of decisions. Defaults to true.
    pub fn skip_environment_entities(mut self, skip: bool) -> Self {
        self.skip_environment_entities = Some(skip);
        self
    }

    /// Builds the decision point.
    ///
    /// Without a cache the policy is fetched from the store once, here.
    ///
    /// # Errors
    ///
    /// Returns [`PdpError::MissingPolicyStore`] if no store was supplied, or
    /// any error from fetching and indexing the policy.
    pub fn build(self) -> Result<JustInTimePdp> {
        let store = self.store.ok_or(PdpError::MissingPolicyStore)?;
        let source = match self.cache {
            Some(cache) => PdpSource::Cached(cache),
            None => PdpSource::Fixed(Arc::new(PdpSet::load(store.as_ref())?)),
        };
        Ok(JustInTimePdp {
            source,
            store,
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(ClaimsEntityResolver) as Arc<dyn EntityResolver>),
            audit: self
                .audit
                .unwrap_or_else(|| Arc::new(TracingAuditSink) as Arc<dyn AuditSink>),
            skip_environment_entities: self.skip_environment_entities.unwrap_or(true),
        })
    }
}

impl JustInTimePdp {
    pub fn builder() -> JustInTimePdpBuilder {
        JustInTimePdpBuilder::default()
    }

    /// Returns the decision points requests are currently served from.
    pub fn policy(&self) -> Arc<PdpSet> {
        match &self.source {
            PdpSource::Cached(cache) => cache.current(),
            PdpSource::Fixed(set) => Arc::clone(set),
        }
    }

    /// Decides whether the identified requester may perform `action` on every
    /// resource.
    ///
    /// Each subject entity is decided independently and the results are
    /// ANDed. A resource passes only if it is entitled and the PEP can fulfil
    /// every obligation it triggers; obligations are dropped from resources
    /// that do not pass.
    pub fn get_decision(
        &self,
        identifier: &EntityIdentifier,
        action: &Action,
        resources: &[Resource],
        context: &RequestContext,
        pep_fulfillable: &[String],
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        let policy = self.policy();
        let (actor_id, entities) = self.resolve(identifier)?;

        let deciding: Vec<&EntityRepresentation> = entities
            .iter()
            .filter(|e| !(self.skip_environment_entities && e.is_environment()))
            .collect();
        if deciding.is_empty() {
            return Err(PdpError::InvalidEntityChain {
                reason: format!("'{actor_id}' has no subject entities to decide for"),
            });
        }

        let mut per_entity = Vec::with_capacity(deciding.len());
        for entity in deciding {
            if cancel.is_cancelled() {
                return Err(PdpError::Cancelled);
            }
            per_entity.push(
                policy
                    .entitlements
                    .get_decision(entity, action, resources, cancel)?,
            );
        }
        let mut decision = consolidate(per_entity)?;

        let triggered = policy
            .obligations
            .get_triggered_obligations(action, resources, context, cancel)?;
        let fulfillable: HashSet<&str> = pep_fulfillable.iter().map(String::as_str).collect();

        for (result, obligations) in decision.results.iter_mut().zip(triggered.per_resource) {
            let satisfied = obligations.fulfilled_by(&fulfillable);
            result.apply_obligations(obligations.obligation_value_fqns, satisfied);

            let mut event = DecisionAuditEvent::new(
                result.resource_id.clone(),
                action.name.clone(),
                actor_id.clone(),
                result.passed,
            );
            event.obligations.clone_from(&result.required_obligations);
            event.fulfillable_obligations = pep_fulfillable.to_vec();
            event.entitled = result.entitled;
            event.obligations_satisfied = result.obligations_satisfied;
            event.data_rule_results.clone_from(&result.data_rule_results);
            self.audit.record(&event);

            // Entitled but unfulfillable resources keep their obligations.
            if !result.entitled {
                result.required_obligations.clear();
            }
        }
        decision.refresh_access();

        if decision.access {
            info!(actor_id = %actor_id, action = %action, resources = resources.len(), "Access permitted");
        } else {
            warn!(
                actor_id = %actor_id,
                action = %action,
                resources = resources.len(),
                denied = decision.results.iter().filter(|r| !r.passed).count(),
                "Access denied"
            );
        }
        Ok(decision)
    }

    /// Resolves the entitlements of every entity the identifier names.
    ///
    /// Environment entities are kept. The index is narrowed to the subject
    /// mappings the store matches against the selectors present in the
    /// entities' claims.
    pub fn get_entitlements(
        &self,
        identifier: &EntityIdentifier,
        with_comprehensive_hierarchy: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<EntityEntitlements>> {
        let policy = self.policy();
        let (actor_id, entities) = self.resolve(identifier)?;

        let selectors: Vec<String> = entities
            .iter()
            .flat_map(|e| e.additional_props.iter())
            .flat_map(selector::selectors)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let matched = self
            .store
            .match_subject_mappings(&selectors)
            .map_err(PdpError::FailedToFetchSubjectMappings)?;

        debug!(
            actor_id = %actor_id,
            selectors = selectors.len(),
            matched_subject_mappings = matched.len(),
            "Matched subject mappings for entitlements"
        );
        policy.entitlements.get_entitlements(
            &entities,
            Some(&matched),
            with_comprehensive_hierarchy,
            cancel,
        )
    }

    /// Reports whether the PEP can fulfil every obligation `action` on
    /// `resources` triggers, with the per-resource obligation lists.
    pub fn get_all_triggered_obligations_are_fulfilled(
        &self,
        resources: &[Resource],
        action: &Action,
        context: &RequestContext,
        pep_fulfillable: &[String],
        cancel: &CancellationToken,
    ) -> Result<(bool, Vec<ResourceObligations>)> {
        let policy = self.policy();
        let triggered = policy
            .obligations
            .get_triggered_obligations(action, resources, context, cancel)?;
        let fulfilled =
            policy
                .obligations
                .get_all_obligations_are_fulfilled(&triggered, pep_fulfillable, context);
        Ok((fulfilled, triggered.per_resource))
    }

    fn resolve(&self, identifier: &EntityIdentifier) -> Result<(String, Vec<EntityRepresentation>)> {
        match identifier {
            EntityIdentifier::EntityChain(chain) => Ok((
                chain.ephemeral_id.clone(),
                self.resolver.resolve_entities(chain)?,
            )),
            EntityIdentifier::Token(token) => {
                let chain = self.resolver.create_entity_chain_from_token(token)?;
                Ok((token.ephemeral_id.clone(), self.resolver.resolve_entities(&chain)?))
            }
            EntityIdentifier::RegisteredResourceValueFqn(_) => Err(PdpError::NotImplemented {
                feature: "registered resource values as entities".to_string(),
            }),
        }
    }
}
