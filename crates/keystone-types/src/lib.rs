//! # keystone-types: Core types for `Keystone`
//!
//! This crate contains the policy and request model shared by the decision
//! point, the configuration layer, and the CLI:
//! - Actions ([`Action`]) with case-insensitive identity
//! - Attribute policy ([`AttributeDefinition`], [`AttributeValue`], [`AttributeRuleType`])
//! - Subject mappings ([`SubjectMapping`], [`SubjectConditionSet`], [`SubjectSet`],
//!   [`ConditionGroup`], [`Condition`])
//! - Entities ([`Entity`], [`EntityChain`], [`EntityRepresentation`], [`Token`],
//!   [`EntityIdentifier`])
//! - Resources ([`Resource`], [`ResourceKind`])
//! - Registered resources ([`RegisteredResource`], [`RegisteredResourceValue`])
//! - Obligations ([`Obligation`], [`ObligationValue`], [`ObligationTrigger`],
//!   [`RequestContext`])
//! - FQN helpers ([`fqn`])
//!
//! Every type is serde-serialisable using the camelCase field names of the
//! platform's JSON policy documents.

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod fqn;

// ============================================================================
// Actions
// ============================================================================

/// An operation an entity wants to perform on a resource.
///
/// Action identity is the lowercased name: `READ`, `Read` and `read` are the
/// same action everywhere in the decision point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    pub fn read() -> Self {
        Self::new("read")
    }

    pub fn create() -> Self {
        Self::new("create")
    }

    pub fn update() -> Self {
        Self::new("update")
    }

    pub fn delete() -> Self {
        Self::new("delete")
    }

    /// Returns the identity key of this action (its lowercased name).
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Returns true if both actions share a name, ignoring case.
    pub fn same_name(&self, other: &Action) -> bool {
        self.name.to_lowercase() == other.name.to_lowercase()
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.same_name(other)
    }
}

impl Eq for Action {}

impl std::hash::Hash for Action {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ============================================================================
// Attribute Policy
// ============================================================================

/// How a resource's values of one definition are checked against entitlements.
///
/// Deserialises from both the short form (`"HIERARCHY"`) and the platform's
/// enum form (`"ATTRIBUTE_RULE_TYPE_ENUM_HIERARCHY"`). Any other string becomes
/// [`AttributeRuleType::Unrecognized`], which fails evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttributeRuleType {
    #[default]
    Unspecified,
    AllOf,
    AnyOf,
    Hierarchy,
    Unrecognized,
}

impl AttributeRuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::AllOf => "ALL_OF",
            Self::AnyOf => "ANY_OF",
            Self::Hierarchy => "HIERARCHY",
            Self::Unrecognized => "UNRECOGNIZED",
        }
    }
}

impl From<String> for AttributeRuleType {
    fn from(value: String) -> Self {
        let upper = value.to_uppercase();
        match upper
            .strip_prefix("ATTRIBUTE_RULE_TYPE_ENUM_")
            .unwrap_or(&upper)
        {
            "" | "UNSPECIFIED" => Self::Unspecified,
            "ALL_OF" => Self::AllOf,
            "ANY_OF" => Self::AnyOf,
            "HIERARCHY" => Self::Hierarchy,
            _ => Self::Unrecognized,
        }
    }
}

impl From<AttributeRuleType> for String {
    fn from(rule: AttributeRuleType) -> Self {
        rule.as_str().to_string()
    }
}

impl Display for AttributeRuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single value of an attribute definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub value: String,
    pub fqn: String,
}

impl AttributeValue {
    pub fn new(value: impl Into<String>, fqn: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            value: value.into(),
            fqn: fqn.into(),
        }
    }
}

/// An attribute definition: a named, ruled, ordered set of values.
///
/// For hierarchy definitions the order of `values` is load-bearing: index 0
/// is the highest value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub fqn: String,
    #[serde(default)]
    pub rule: AttributeRuleType,
    #[serde(default)]
    pub values: Vec<AttributeValue>,
}

impl AttributeDefinition {
    /// Creates a definition under `namespace` whose values are derived from
    /// the given names, in order.
    pub fn new(namespace: &str, name: &str, rule: AttributeRuleType, values: &[&str]) -> Self {
        let definition_fqn = fqn::definition_fqn(namespace, name);
        let values = values
            .iter()
            .map(|v| AttributeValue::new(*v, fqn::attribute_value_fqn(namespace, name, v)))
            .collect();
        Self {
            id: String::new(),
            name: name.to_string(),
            fqn: definition_fqn,
            rule,
            values,
        }
    }

    /// Returns the FQN of the value named `value`, if the definition has one.
    pub fn value_fqn(&self, value: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.fqn.as_str())
    }
}

// ============================================================================
// Subject Mappings
// ============================================================================

/// Comparison between selected claim values and a condition's reference values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubjectMappingOperator {
    #[default]
    Unspecified,
    /// Some selected value equals some reference value.
    In,
    /// No selected value equals any reference value.
    NotIn,
    /// Some selected value contains some reference value as a substring.
    InContains,
}

impl SubjectMappingOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::InContains => "IN_CONTAINS",
        }
    }
}

impl From<String> for SubjectMappingOperator {
    fn from(value: String) -> Self {
        let upper = value.to_uppercase();
        match upper
            .strip_prefix("SUBJECT_MAPPING_OPERATOR_ENUM_")
            .unwrap_or(&upper)
        {
            "IN" => Self::In,
            "NOT_IN" => Self::NotIn,
            "IN_CONTAINS" => Self::InContains,
            _ => Self::Unspecified,
        }
    }
}

impl From<SubjectMappingOperator> for String {
    fn from(op: SubjectMappingOperator) -> Self {
        op.as_str().to_string()
    }
}

/// How the conditions inside a [`ConditionGroup`] combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionBooleanType {
    #[default]
    Unspecified,
    And,
    Or,
}

impl ConditionBooleanType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl From<String> for ConditionBooleanType {
    fn from(value: String) -> Self {
        let upper = value.to_uppercase();
        match upper
            .strip_prefix("CONDITION_BOOLEAN_TYPE_ENUM_")
            .unwrap_or(&upper)
        {
            "AND" => Self::And,
            "OR" => Self::Or,
            _ => Self::Unspecified,
        }
    }
}

impl From<ConditionBooleanType> for String {
    fn from(op: ConditionBooleanType) -> Self {
        op.as_str().to_string()
    }
}

/// A single selector test against an entity's claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub subject_external_selector_value: String,
    pub operator: SubjectMappingOperator,
    #[serde(default)]
    pub subject_external_values: Vec<String>,
}

impl Condition {
    pub fn new(selector: &str, operator: SubjectMappingOperator, values: &[&str]) -> Self {
        Self {
            subject_external_selector_value: selector.to_string(),
            operator,
            subject_external_values: values.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Conditions joined by an explicit boolean operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionGroup {
    pub conditions: Vec<Condition>,
    pub boolean_operator: ConditionBooleanType,
}

impl ConditionGroup {
    pub fn new(boolean_operator: ConditionBooleanType, conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            boolean_operator,
        }
    }
}

/// A conjunction of condition groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSet {
    pub condition_groups: Vec<ConditionGroup>,
}

/// A disjunction of subject sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectConditionSet {
    #[serde(default)]
    pub id: String,
    pub subject_sets: Vec<SubjectSet>,
}

impl SubjectConditionSet {
    pub fn new(subject_sets: Vec<SubjectSet>) -> Self {
        Self {
            id: String::new(),
            subject_sets,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Binds an attribute value to the actions granted when a condition set matches.
///
/// `attribute_value` and `actions` are optional on the wire so that
/// structurally invalid mappings can be rejected with a precise error instead
/// of failing deserialisation. Condition sets sit behind an [`Arc`] because
/// one set is commonly shared by many mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMapping {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub attribute_value: Option<AttributeValue>,
    #[serde(default)]
    pub subject_condition_set: Option<Arc<SubjectConditionSet>>,
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
}

impl SubjectMapping {
    pub fn new(
        attribute_value: AttributeValue,
        condition_set: Arc<SubjectConditionSet>,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            id: String::new(),
            attribute_value: Some(attribute_value),
            subject_condition_set: Some(condition_set),
            actions: Some(actions),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Returns the FQN of the mapped attribute value, if present and non-empty.
    pub fn value_fqn(&self) -> Option<&str> {
        self.attribute_value
            .as_ref()
            .map(|v| v.fqn.as_str())
            .filter(|fqn| !fqn.is_empty())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Whether an entity is the acting subject or part of the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityCategory {
    #[default]
    Unspecified,
    Subject,
    Environment,
}

/// The identifying payload of an entity before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    EmailAddress(String),
    UserName(String),
    ClientId(String),
    Uuid(String),
    /// A free-form claim document supplied by the caller.
    Claims(Value),
}

/// One logical actor in a decision request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub ephemeral_id: String,
    #[serde(default)]
    pub category: EntityCategory,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(ephemeral_id: impl Into<String>, category: EntityCategory, kind: EntityKind) -> Self {
        Self {
            ephemeral_id: ephemeral_id.into(),
            category,
            kind,
        }
    }

    pub fn subject_claims(ephemeral_id: impl Into<String>, claims: Value) -> Self {
        Self::new(ephemeral_id, EntityCategory::Subject, EntityKind::Claims(claims))
    }
}

/// An ordered sequence of entities acting together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChain {
    #[serde(default)]
    pub ephemeral_id: String,
    pub entities: Vec<Entity>,
}

impl EntityChain {
    pub fn new(ephemeral_id: impl Into<String>, entities: Vec<Entity>) -> Self {
        Self {
            ephemeral_id: ephemeral_id.into(),
            entities,
        }
    }
}

/// An entity after resolution: its id, category, and claim documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRepresentation {
    pub original_id: String,
    #[serde(default)]
    pub category: EntityCategory,
    #[serde(default)]
    pub additional_props: Vec<Value>,
}

impl EntityRepresentation {
    pub fn new(original_id: impl Into<String>, additional_props: Vec<Value>) -> Self {
        Self {
            original_id: original_id.into(),
            category: EntityCategory::Subject,
            additional_props,
        }
    }

    pub fn with_category(mut self, category: EntityCategory) -> Self {
        self.category = category;
        self
    }

    pub fn is_environment(&self) -> bool {
        self.category == EntityCategory::Environment
    }
}

/// A bearer token carried on a request.
///
/// `Debug` never prints the JWT; only the ephemeral id.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub ephemeral_id: String,
    pub jwt: String,
}

impl Token {
    pub fn new(ephemeral_id: impl Into<String>, jwt: impl Into<String>) -> Self {
        Self {
            ephemeral_id: ephemeral_id.into(),
            jwt: jwt.into(),
        }
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("ephemeral_id", &self.ephemeral_id)
            .field("jwt", &"<redacted>")
            .finish()
    }
}

/// How the requestor of a decision is identified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityIdentifier {
    EntityChain(EntityChain),
    Token(Token),
    /// Reserved: registered resources acting as entities are not decided.
    RegisteredResourceValueFqn(String),
}

// ============================================================================
// Resources
// ============================================================================

/// The two shapes a decision resource can take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    AttributeValues { fqns: Vec<String> },
    RegisteredResourceValueFqn(String),
}

/// A resource named in a decision request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub ephemeral_id: String,
    pub kind: ResourceKind,
}

impl Resource {
    pub fn attribute_values<S: Into<String>>(
        ephemeral_id: impl Into<String>,
        fqns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            ephemeral_id: ephemeral_id.into(),
            kind: ResourceKind::AttributeValues {
                fqns: fqns.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn registered(ephemeral_id: impl Into<String>, fqn: impl Into<String>) -> Self {
        Self {
            ephemeral_id: ephemeral_id.into(),
            kind: ResourceKind::RegisteredResourceValueFqn(fqn.into()),
        }
    }
}

// ============================================================================
// Registered Resources
// ============================================================================

/// An (action, attribute value) pair attached to a registered resource value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAttributeValue {
    pub action: Action,
    pub attribute_value_fqn: String,
}

/// One value of a registered resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredResourceValue {
    #[serde(default)]
    pub id: String,
    pub value: String,
    #[serde(default)]
    pub fqn: String,
    #[serde(default)]
    pub action_attribute_values: Vec<ActionAttributeValue>,
}

impl RegisteredResourceValue {
    /// Returns the attribute value FQNs bound to `action` on this value.
    pub fn attribute_value_fqns_for<'a>(
        &'a self,
        action: &'a Action,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.action_attribute_values
            .iter()
            .filter(move |aav| aav.action.same_name(action))
            .map(|aav| aav.attribute_value_fqn.as_str())
    }
}

/// A named resource registered in policy with its own values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredResource {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub values: Vec<RegisteredResourceValue>,
}

impl RegisteredResource {
    /// Returns `(fqn, value)` pairs, deriving the FQN when the stored one is empty.
    pub fn values_by_fqn(&self) -> impl Iterator<Item = (String, &RegisteredResourceValue)> {
        self.values.iter().map(|v| {
            let fqn = if v.fqn.is_empty() {
                fqn::registered_resource_value_fqn(&self.name, &v.value)
            } else {
                v.fqn.clone()
            };
            (fqn, v)
        })
    }
}

// ============================================================================
// Obligations
// ============================================================================

/// The enforcing PEP's identity on a request or trigger scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEnforcementPoint {
    pub client_id: String,
}

/// Optional request metadata naming the calling PEP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub pep: Option<PolicyEnforcementPoint>,
}

impl RequestContext {
    pub fn for_client(client_id: impl Into<String>) -> Self {
        Self {
            pep: Some(PolicyEnforcementPoint {
                client_id: client_id.into(),
            }),
        }
    }

    /// Returns the PEP client id, treating an empty id as absent.
    pub fn client_id(&self) -> Option<&str> {
        self.pep
            .as_ref()
            .map(|pep| pep.client_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// What an obligation trigger fires on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerTarget {
    AttributeValue(String),
    RegisteredResourceValue(String),
}

/// Binds an action and a target to an obligation value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObligationTrigger {
    #[serde(default)]
    pub id: String,
    pub action: Action,
    pub target: TriggerTarget,
    /// When non-empty, the trigger only applies to these PEP clients.
    #[serde(default)]
    pub contexts: Vec<RequestContext>,
}

impl ObligationTrigger {
    pub fn on_attribute_value(action: Action, fqn: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            action,
            target: TriggerTarget::AttributeValue(fqn.into()),
            contexts: Vec::new(),
        }
    }

    pub fn on_registered_resource_value(action: Action, fqn: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            action,
            target: TriggerTarget::RegisteredResourceValue(fqn.into()),
            contexts: Vec::new(),
        }
    }

    pub fn scoped_to(mut self, client_id: impl Into<String>) -> Self {
        self.contexts.push(RequestContext::for_client(client_id));
        self
    }
}

/// A single obligation value and its triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObligationValue {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub value: String,
    pub fqn: String,
    #[serde(default)]
    pub triggers: Vec<ObligationTrigger>,
}

impl ObligationValue {
    pub fn new(fqn: impl Into<String>, triggers: Vec<ObligationTrigger>) -> Self {
        Self {
            id: String::new(),
            value: String::new(),
            fqn: fqn.into(),
            triggers,
        }
    }
}

/// A named obligation grouping its values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub values: Vec<ObligationValue>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn action_identity_ignores_case() {
        assert_eq!(Action::new("READ"), Action::read());
        assert_eq!(Action::new("Read").key(), "read");
        assert_ne!(Action::read(), Action::create());
    }

    #[test_case("ALL_OF", AttributeRuleType::AllOf; "short all-of")]
    #[test_case("ATTRIBUTE_RULE_TYPE_ENUM_ANY_OF", AttributeRuleType::AnyOf; "enum any-of")]
    #[test_case("hierarchy", AttributeRuleType::Hierarchy; "lowercase hierarchy")]
    #[test_case("ATTRIBUTE_RULE_TYPE_ENUM_UNSPECIFIED", AttributeRuleType::Unspecified; "unspecified")]
    #[test_case("MOST_OF", AttributeRuleType::Unrecognized; "unknown rule")]
    fn rule_type_parses(input: &str, expected: AttributeRuleType) {
        let parsed: AttributeRuleType = serde_json::from_value(json!(input)).unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn definition_builder_derives_value_fqns() {
        let def = AttributeDefinition::new(
            "example.com",
            "classification",
            AttributeRuleType::Hierarchy,
            &["topsecret", "secret"],
        );
        assert_eq!(def.fqn, "https://example.com/attr/classification");
        assert_eq!(
            def.value_fqn("secret"),
            Some("https://example.com/attr/classification/value/secret")
        );
        assert_eq!(def.value_fqn("public"), None);
    }

    #[test]
    fn subject_mapping_deserialises_platform_json() {
        let doc = json!({
            "attributeValue": { "fqn": "https://example.com/attr/dept/value/eng" },
            "subjectConditionSet": {
                "subjectSets": [{
                    "conditionGroups": [{
                        "booleanOperator": "CONDITION_BOOLEAN_TYPE_ENUM_AND",
                        "conditions": [{
                            "subjectExternalSelectorValue": ".department",
                            "operator": "SUBJECT_MAPPING_OPERATOR_ENUM_IN",
                            "subjectExternalValues": ["engineering"]
                        }]
                    }]
                }]
            },
            "actions": [{ "name": "read" }]
        });

        let mapping: SubjectMapping = serde_json::from_value(doc).unwrap();
        assert_eq!(
            mapping.value_fqn(),
            Some("https://example.com/attr/dept/value/eng")
        );
        let set = mapping.subject_condition_set.unwrap();
        let group = &set.subject_sets[0].condition_groups[0];
        assert_eq!(group.boolean_operator, ConditionBooleanType::And);
        assert_eq!(group.conditions[0].operator, SubjectMappingOperator::In);
    }

    #[test]
    fn mapping_without_actions_keeps_none() {
        let mapping: SubjectMapping = serde_json::from_value(json!({
            "attributeValue": { "fqn": "https://example.com/attr/a/value/b" }
        }))
        .unwrap();
        assert!(mapping.actions.is_none());
        assert!(mapping.subject_condition_set.is_none());
    }

    #[test]
    fn request_context_empty_client_is_absent() {
        assert_eq!(RequestContext::default().client_id(), None);
        assert_eq!(RequestContext::for_client("").client_id(), None);
        assert_eq!(RequestContext::for_client("pep-a").client_id(), Some("pep-a"));
    }

    #[test]
    fn token_debug_redacts_jwt() {
        let token = Token::new("tok-1", "eyJhbGciOiJub25lIn0.eyJzdWIiOiJhbGljZSJ9.");
        let rendered = format!("{token:?}");
        assert!(rendered.contains("tok-1"));
        assert!(!rendered.contains("eyJ"));
    }

    #[test]
    fn registered_resource_derives_missing_fqn() {
        let rr = RegisteredResource {
            id: String::new(),
            name: "network".to_string(),
            values: vec![RegisteredResourceValue {
                value: "internal".to_string(),
                ..Default::default()
            }],
        };
        let (fqn, _) = rr.values_by_fqn().next().unwrap();
        assert_eq!(fqn, "https://reg_res/network/value/internal");
    }

    #[test]
    fn registered_value_filters_by_action() {
        let value = RegisteredResourceValue {
            id: String::new(),
            value: "internal".to_string(),
            fqn: String::new(),
            action_attribute_values: vec![
                ActionAttributeValue {
                    action: Action::read(),
                    attribute_value_fqn: "https://example.com/attr/a/value/x".to_string(),
                },
                ActionAttributeValue {
                    action: Action::create(),
                    attribute_value_fqn: "https://example.com/attr/a/value/y".to_string(),
                },
            ],
        };
        let read = Action::new("READ");
        let fqns: Vec<&str> = value.attribute_value_fqns_for(&read).collect();
        assert_eq!(fqns, vec!["https://example.com/attr/a/value/x"]);
    }
}
