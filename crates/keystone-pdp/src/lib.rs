//! # keystone-pdp: Attribute-Based Policy Decision Point
//!
//! Decides whether entities may perform actions on resources tagged with
//! attribute values, and which obligations the enforcing PEP must fulfil.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Request                                     │
//! │  (EntityIdentifier + Action + Resources)     │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  JustInTimePdp                               │
//! │  ├─ Resolve entities (chain or token)        │
//! │  ├─ Decide per subject entity                │
//! │  ├─ AND across the chain                     │
//! │  └─ Apply obligations, audit                 │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  PdpSet (one policy snapshot)                │
//! │  ├─ PolicyDecisionPoint                      │
//! │  │   selectors → subject mappings → rules    │
//! │  └─ ObligationsPdp                           │
//! │      action × attribute value → obligations  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Rule Families
//!
//! - **all-of**: every requested value must be entitled
//! - **any-of**: one entitled value suffices
//! - **hierarchy**: an entitlement at or above the highest requested value
//!   suffices; index 0 is the highest value
//!
//! ## Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use keystone_pdp::PolicyDecisionPoint;
//! use keystone_types::{
//!     Action, AttributeDefinition, AttributeRuleType, AttributeValue, Condition,
//!     ConditionBooleanType, ConditionGroup, EntityRepresentation, Resource, SubjectConditionSet,
//!     SubjectMapping, SubjectMappingOperator, SubjectSet,
//! };
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! let classification = AttributeDefinition::new(
//!     "example.com",
//!     "classification",
//!     AttributeRuleType::Hierarchy,
//!     &["secret", "confidential", "public"],
//! );
//! let secret = classification.value_fqn("secret").unwrap().to_string();
//! let public = classification.value_fqn("public").unwrap().to_string();
//!
//! let cleared = SubjectConditionSet::new(vec![SubjectSet {
//!     condition_groups: vec![ConditionGroup::new(
//!         ConditionBooleanType::And,
//!         vec![Condition::new(".clearance", SubjectMappingOperator::In, &["secret"])],
//!     )],
//! }]);
//! let mapping = SubjectMapping::new(
//!     AttributeValue::new("secret", secret),
//!     Arc::new(cleared),
//!     vec![Action::read()],
//! );
//!
//! let pdp = PolicyDecisionPoint::new(&[classification], &[mapping]).unwrap();
//! let alice = EntityRepresentation::new("alice", vec![json!({ "clearance": "secret" })]);
//!
//! let decision = pdp
//!     .get_decision(
//!         &alice,
//!         &Action::read(),
//!         &[Resource::attribute_values("doc-1", [public])],
//!         &CancellationToken::new(),
//!     )
//!     .unwrap();
//! assert!(decision.access);
//! ```

pub mod attributes;
pub mod audit;
pub mod cache;
pub mod decision;
pub mod entity;
pub mod error;
pub mod evaluator;
pub mod jit;
pub mod obligations;
pub mod pdp;
pub mod selector;
pub mod snapshot;
pub mod store;
pub mod subject_mapping;

// Kani proofs for bounded model checking
#[cfg(any(test, kani))]
mod kani_proofs;


pub use attributes::{EntitleableAttributes, EntitleableValue, IndexedDefinition};
pub use audit::{AuditSink, DecisionAuditEvent, MemoryAuditSink, TracingAuditSink};
pub use cache::{CacheOptions, PolicyCache};
pub use decision::{Decision, ResourceDecision};
pub use entity::{ClaimsEntityResolver, EntityResolver};
pub use error::{PdpError, Result};
pub use evaluator::{DataRuleResult, EntitlementFailure, EntitlementMap, RuleError};
pub use jit::{JustInTimePdp, JustInTimePdpBuilder};
pub use obligations::{ObligationsPdp, ResourceObligations, TriggeredObligations};
pub use pdp::{EntityEntitlements, PolicyDecisionPoint};
pub use selector::{Selector, SelectorError};
pub use snapshot::{PdpSet, PolicySnapshot};
pub use store::{InMemoryPolicyStore, PolicyDocument, PolicyStore, StoreError};
