//! Consistent policy snapshots and the decision points built from them.

use keystone_types::{AttributeDefinition, Obligation, RegisteredResource, SubjectMapping};
use tracing::info;

use crate::error::{PdpError, Result};
use crate::obligations::ObligationsPdp;
use crate::pdp::PolicyDecisionPoint;
use crate::store::PolicyStore;

/// Every policy list a decision needs, fetched together.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    pub attributes: Vec<AttributeDefinition>,
    pub subject_mappings: Vec<SubjectMapping>,
    pub registered_resources: Vec<RegisteredResource>,
    pub obligations: Vec<Obligation>,
}

impl PolicySnapshot {
    /// Fetches all policy kinds. Any failed fetch aborts the snapshot.
    pub fn fetch(store: &dyn PolicyStore) -> Result<Self> {
        let attributes = store.list_attributes().map_err(PdpError::FailedToFetchAttributes)?;
        let subject_mappings = store
            .list_subject_mappings()
            .map_err(PdpError::FailedToFetchSubjectMappings)?;
        let registered_resources = store
            .list_registered_resources()
            .map_err(PdpError::FailedToFetchRegisteredResources)?;
        let obligations = store
            .list_obligations()
            .map_err(PdpError::FailedToFetchObligations)?;

        Ok(Self {
            attributes,
            subject_mappings,
            registered_resources,
            obligations,
        })
    }
}

/// The entitlement and obligation decision points over one snapshot.
#[derive(Debug, Clone)]
pub struct PdpSet {
    pub entitlements: PolicyDecisionPoint,
    pub obligations: ObligationsPdp,
}

impl PdpSet {
    pub fn from_snapshot(snapshot: &PolicySnapshot) -> Result<Self> {
        let entitlements = PolicyDecisionPoint::new(&snapshot.attributes, &snapshot.subject_mappings)?;
        let obligations = ObligationsPdp::new(&snapshot.obligations, &snapshot.registered_resources)?;
        info!(
            definitions = snapshot.attributes.len(),
            registered_resources = snapshot.registered_resources.len(),
            obligations = snapshot.obligations.len(),
            "Built decision points from policy snapshot"
        );
        Ok(Self {
            entitlements,
            obligations,
        })
    }

    /// Fetches a snapshot from `store` and builds both decision points.
    pub fn load(store: &dyn PolicyStore) -> Result<Self> {
        Self::from_snapshot(&PolicySnapshot::fetch(store)?)
    }
}
