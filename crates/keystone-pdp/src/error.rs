//! Error type for the decision point.
//!
//! Per-resource rule failures are not errors: they are data on the decision.
//! Everything here aborts either snapshot construction or a single request.

use thiserror::Error;

use crate::evaluator::RuleError;
use crate::selector::SelectorError;
use crate::store::StoreError;

/// Error type for decision, entitlement, and obligation operations.
#[derive(Debug, Error)]
pub enum PdpError {
    // -- Input validation --
    /// The entity chain or token could not be turned into entities.
    #[error("Invalid entity chain: {reason}")]
    InvalidEntityChain { reason: String },

    /// The requested action is missing or unnamed.
    #[error("Invalid action: {reason}")]
    InvalidAction { reason: String },

    /// A resource in the request is unusable.
    #[error("Invalid resource '{resource_id}': {reason}")]
    InvalidResource { resource_id: String, reason: String },

    /// An entity carries a payload the resolver cannot represent.
    #[error("Invalid entity type for '{entity_id}': {reason}")]
    InvalidEntityType { entity_id: String, reason: String },

    // -- Policy structure --
    /// An attribute definition violates a structural invariant.
    #[error("Invalid attribute definition '{definition_fqn}': {reason}")]
    InvalidAttributeDefinition {
        definition_fqn: String,
        reason: String,
    },

    /// A subject mapping violates a structural invariant.
    #[error("Invalid subject mapping '{mapping_id}': {reason}")]
    InvalidSubjectMapping { mapping_id: String, reason: String },

    /// A required part of the policy snapshot is absent.
    #[error("Missing required policy: {what}")]
    MissingRequiredPolicy { what: String },

    /// A definition has no rule set.
    #[error("Attribute definition '{definition_fqn}' has an unspecified rule")]
    MissingRequiredSpecifiedRule { definition_fqn: String },

    /// A definition uses a rule outside all-of, any-of, hierarchy.
    #[error("Attribute definition '{definition_fqn}' has an unrecognized rule")]
    UnrecognizedRule { definition_fqn: String },

    /// An obligation trigger is scoped to a PEP with an empty client id.
    #[error("Obligation value '{obligation_value_fqn}' has a trigger scoped to an empty PEP client id")]
    EmptyPepClientId { obligation_value_fqn: String },

    // -- Lookup --
    /// An attribute value FQN is not present in the policy snapshot.
    #[error("Attribute value FQN not found: {fqn}")]
    FqnNotFound { fqn: String },

    /// No definition exists for the given FQN.
    #[error("Attribute definition not found for: {fqn}")]
    DefinitionNotFound { fqn: String },

    /// A registered resource value FQN is not present in the policy snapshot.
    #[error("Unknown registered resource value: {fqn}")]
    UnknownRegisteredResourceValue { fqn: String },

    // -- Resolution --
    /// A condition selector could not be parsed while resolving an entity.
    #[error("Malformed selector while resolving entity '{entity_id}': {source}")]
    MalformedSelector {
        entity_id: String,
        #[source]
        source: SelectorError,
    },

    /// Rule evaluation failed for a definition.
    #[error("Failed to evaluate '{definition_fqn}' for action '{action}': {source}")]
    FailedEvaluation {
        definition_fqn: String,
        action: String,
        #[source]
        source: RuleError,
    },

    // -- Consolidation --
    /// Per-entity decisions disagree on the number of resources.
    #[error("Resource decision length mismatch: expected {expected}, got {actual}")]
    ResourceDecisionLengthMismatch { expected: usize, actual: usize },

    /// Per-entity decisions disagree on resource identity at a position.
    #[error("Resource decision id mismatch: expected '{expected}', got '{actual}'")]
    ResourceDecisionIdMismatch { expected: String, actual: String },

    // -- Dependencies --
    #[error("Failed to fetch attributes: {0}")]
    FailedToFetchAttributes(#[source] StoreError),

    #[error("Failed to fetch subject mappings: {0}")]
    FailedToFetchSubjectMappings(#[source] StoreError),

    #[error("Failed to fetch registered resources: {0}")]
    FailedToFetchRegisteredResources(#[source] StoreError),

    #[error("Failed to fetch obligations: {0}")]
    FailedToFetchObligations(#[source] StoreError),

    /// The just-in-time decision point was built without a policy store.
    #[error("A policy store is required")]
    MissingPolicyStore,

    // -- Runtime --
    /// A reserved request shape that this decision point does not evaluate.
    #[error("Not implemented: {feature}")]
    NotImplemented { feature: String },

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// The cache refresh worker could not be started.
    #[error("Failed to spawn policy cache worker: {0}")]
    CacheWorkerSpawn(#[source] std::io::Error),
}

/// Result type for decision point operations.
pub type Result<T> = std::result::Result<T, PdpError>;
