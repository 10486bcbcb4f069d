//! Fully-qualified name helpers.
//!
//! FQNs are compared case-sensitively. Layouts:
//! - definition: `https://<namespace>/attr/<name>`
//! - attribute value: `https://<namespace>/attr/<name>/value/<value>`
//! - obligation value: `https://<namespace>/obl/<name>/value/<value>`
//! - registered resource value: `https://reg_res/<name>/value/<value>`

const VALUE_SEGMENT: &str = "/value/";

pub fn definition_fqn(namespace: &str, name: &str) -> String {
    format!("https://{namespace}/attr/{name}")
}

pub fn attribute_value_fqn(namespace: &str, name: &str, value: &str) -> String {
    format!("https://{namespace}/attr/{name}{VALUE_SEGMENT}{value}")
}

pub fn obligation_value_fqn(namespace: &str, name: &str, value: &str) -> String {
    format!("https://{namespace}/obl/{name}{VALUE_SEGMENT}{value}")
}

pub fn registered_resource_value_fqn(name: &str, value: &str) -> String {
    format!("https://reg_res/{name}{VALUE_SEGMENT}{value}")
}

/// Returns the definition part of an attribute value FQN.
///
/// # Examples
///
/// ```
/// use keystone_types::fqn::definition_of;
///
/// assert_eq!(
///     definition_of("https://example.com/attr/level/value/high"),
///     Some("https://example.com/attr/level")
/// );
/// assert_eq!(definition_of("https://example.com/attr/level"), None);
/// ```
pub fn definition_of(value_fqn: &str) -> Option<&str> {
    value_fqn
        .rfind(VALUE_SEGMENT)
        .map(|idx| &value_fqn[..idx])
        .filter(|def| !def.is_empty())
}

/// Returns true if `value_fqn` names a value directly under `definition_fqn`.
pub fn is_value_of(definition_fqn: &str, value_fqn: &str) -> bool {
    value_fqn
        .strip_prefix(definition_fqn)
        .and_then(|rest| rest.strip_prefix(VALUE_SEGMENT))
        .is_some_and(|value| !value.is_empty() && !value.contains('/'))
}
