//! Policy store abstraction.
//!
//! The decision points consume fully-materialised policy lists; paging and
//! transport belong to the store. [`InMemoryPolicyStore`] serves a
//! [`PolicyDocument`] loaded from JSON and backs the CLI and tests.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use keystone_types::{AttributeDefinition, Obligation, RegisteredResource, SubjectMapping};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::selector::{Segment, Selector};

/// Errors raised by a policy store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read policy document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse policy document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The backing service could not answer.
    #[error("Policy store unavailable: {0}")]
    Unavailable(String),
}

/// Source of policy for building a snapshot.
pub trait PolicyStore: Send + Sync {
    fn list_attributes(&self) -> Result<Vec<AttributeDefinition>, StoreError>;

    fn list_subject_mappings(&self) -> Result<Vec<SubjectMapping>, StoreError>;

    fn list_registered_resources(&self) -> Result<Vec<RegisteredResource>, StoreError>;

    fn list_obligations(&self) -> Result<Vec<Obligation>, StoreError>;

    /// Returns the subject mappings with at least one condition whose
    /// selector reaches the same path as one of `selectors`.
    ///
    /// Selectors are compared after parsing, so spelling differences such as
    /// `.["a"]` against `.a` do not matter. Unparsable selectors never match.
    fn match_subject_mappings(&self, selectors: &[String]) -> Result<Vec<SubjectMapping>, StoreError>;
}

/// A complete policy in the platform's JSON layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    pub subject_mappings: Vec<SubjectMapping>,
    #[serde(default)]
    pub registered_resources: Vec<RegisteredResource>,
    #[serde(default)]
    pub obligations: Vec<Obligation>,
}

impl PolicyDocument {
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }
}

/// A [`PolicyStore`] over an in-memory [`PolicyDocument`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryPolicyStore {
    document: PolicyDocument,
}

impl InMemoryPolicyStore {
    pub fn new(document: PolicyDocument) -> Self {
        Self { document }
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let document = PolicyDocument::load(path)?;
        tracing::info!(
            path = %path.display(),
            attributes = document.attributes.len(),
            subject_mappings = document.subject_mappings.len(),
            registered_resources = document.registered_resources.len(),
            obligations = document.obligations.len(),
            "Loaded policy document"
        );
        Ok(Self::new(document))
    }

    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn list_attributes(&self) -> Result<Vec<AttributeDefinition>, StoreError> {
        Ok(self.document.attributes.clone())
    }

    fn list_subject_mappings(&self) -> Result<Vec<SubjectMapping>, StoreError> {
        Ok(self.document.subject_mappings.clone())
    }

    fn list_registered_resources(&self) -> Result<Vec<RegisteredResource>, StoreError> {
        Ok(self.document.registered_resources.clone())
    }

    fn list_obligations(&self) -> Result<Vec<Obligation>, StoreError> {
        Ok(self.document.obligations.clone())
    }

    fn match_subject_mappings(&self, selectors: &[String]) -> Result<Vec<SubjectMapping>, StoreError> {
        // Compare parsed paths so `.["a"]`, `."a"` and `.a` all match.
        let wanted: HashSet<Vec<Segment>> = selectors
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .map(|s| s.segments().to_vec())
            .collect();
        Ok(self
            .document
            .subject_mappings
            .iter()
            .filter(|mapping| {
                mapping
                    .subject_condition_set
                    .iter()
                    .flat_map(|set| &set.subject_sets)
                    .flat_map(|subject_set| &subject_set.condition_groups)
                    .flat_map(|group| &group.conditions)
                    .filter_map(|c| Selector::parse(&c.subject_external_selector_value).ok())
                    .any(|selector| wanted.contains(selector.segments()))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOCUMENT: &str = r#"{
        "attributes": [{
            "fqn": "https://example.com/attr/department",
            "rule": "ANY_OF",
            "values": [{ "value": "engineering", "fqn": "https://example.com/attr/department/value/engineering" }]
        }],
        "subjectMappings": [{
            "attributeValue": { "fqn": "https://example.com/attr/department/value/engineering" },
            "subjectConditionSet": { "subjectSets": [{ "conditionGroups": [{
                "booleanOperator": "AND",
                "conditions": [{ "subjectExternalSelectorValue": ".department", "operator": "IN", "subjectExternalValues": ["engineering"] }]
            }]}]},
            "actions": [{ "name": "read" }]
        }]
    }"#;

    #[test]
    fn parses_document() {
        let doc = PolicyDocument::from_json(DOCUMENT).unwrap();
        assert_eq!(doc.attributes.len(), 1);
        assert_eq!(doc.subject_mappings.len(), 1);
        assert!(doc.obligations.is_empty());
    }

    #[test]
    fn matches_mappings_by_selector() {
        let store = InMemoryPolicyStore::new(PolicyDocument::from_json(DOCUMENT).unwrap());
        assert_eq!(
            store
                .match_subject_mappings(&[".department".to_string()])
                .unwrap()
                .len(),
            1
        );
        assert!(
            store
                .match_subject_mappings(&[".level".to_string()])
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn matches_mappings_by_parsed_path() {
        let document = DOCUMENT.replace(r#"".department""#, r#""'.[\"department\"]'""#);
        let store = InMemoryPolicyStore::new(PolicyDocument::from_json(&document).unwrap());
        assert_eq!(
            store
                .match_subject_mappings(&[".department".to_string()])
                .unwrap()
                .len(),
            1
        );
        assert!(
            store
                .match_subject_mappings(&[".department[".to_string()])
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOCUMENT.as_bytes()).unwrap();
        let store = InMemoryPolicyStore::load(file.path()).unwrap();
        assert_eq!(store.list_attributes().unwrap().len(), 1);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = PolicyDocument::load(Path::new("/nonexistent/keystone/policy.json"));
        assert!(matches!(result, Err(StoreError::Read { .. })));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        assert!(matches!(
            PolicyDocument::from_json("{ not json"),
            Err(StoreError::Parse(_))
        ));
    }
}
