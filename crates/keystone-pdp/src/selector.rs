//! Claim selectors.
//!
//! A selector is a jq-style path expression evaluated against one entity
//! claim document. Only a strict subset of jq is accepted:
//!
//! | Form          | Meaning                                   |
//! |---------------|-------------------------------------------|
//! | `.`           | the document itself                       |
//! | `.a.b`        | object field access                       |
//! | `."a-b"`      | quoted field access (JSON escapes)        |
//! | `.["a"]`      | bracketed quoted field access             |
//! | `.a[2]`       | array index (negative counts from the end)|
//! | `.a[]`        | iterate an array (or object values)       |
//!
//! Anything else, pipes and functions included, is a [`SelectorError`].
//! A selector that does not match (missing field, index out of range,
//! iterating a scalar) yields an empty sequence rather than an error.
//!
//! One layer of shell escaping is unwrapped before parsing, so both
//! `'.roles[0]'` and `.\"full name\"` are accepted.

use std::borrow::Cow;
use std::collections::BTreeSet;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, space0},
    combinator::{all_consuming, map, map_res, opt, recognize, success, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
};
use serde_json::Value;
use thiserror::Error;

/// Error returned when a selector expression cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("selector is empty")]
    Empty,

    #[error("malformed selector '{selector}' at offset {offset}")]
    Malformed { selector: String, offset: usize },
}

/// One step of a parsed selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Field(String),
    Index(i64),
    Iterate,
}

/// A parsed selector, ready to be evaluated against many documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    segments: Vec<Segment>,
}

impl Selector {
    /// Parses a selector expression.
    ///
    /// # Examples
    ///
    /// ```
    /// use keystone_pdp::selector::{Segment, Selector};
    ///
    /// let selector = Selector::parse(".roles[0]").unwrap();
    /// assert_eq!(
    ///     selector.segments(),
    ///     &[Segment::Field("roles".to_string()), Segment::Index(0)]
    /// );
    /// assert!(Selector::parse(".roles | length").is_err());
    /// ```
    pub fn parse(expr: &str) -> Result<Self, SelectorError> {
        let unwrapped = unwrap_shell_escaping(expr);
        if unwrapped.is_empty() {
            return Err(SelectorError::Empty);
        }

        match all_consuming(path)(unwrapped.as_ref()) {
            Ok((_, segments)) => Ok(Self {
                source: expr.to_string(),
                segments,
            }),
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(SelectorError::Malformed {
                selector: expr.to_string(),
                offset: unwrapped.len() - e.input.len(),
            }),
            Err(nom::Err::Incomplete(_)) => Err(SelectorError::Malformed {
                selector: expr.to_string(),
                offset: unwrapped.len(),
            }),
        }
    }

    /// Returns the expression this selector was parsed from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Evaluates the selector and returns the matched primitive values.
    ///
    /// Arrays at the end of the path contribute their primitive elements.
    /// Objects and nulls contribute nothing.
    pub fn evaluate<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        let mut current: Vec<&'a Value> = vec![doc];
        for segment in &self.segments {
            current = current
                .into_iter()
                .flat_map(|v| step(v, segment))
                .collect();
            if current.is_empty() {
                return current;
            }
        }

        let mut out = Vec::with_capacity(current.len());
        for v in current {
            match v {
                Value::Array(items) => out.extend(items.iter().filter(|i| is_primitive(i))),
                v if is_primitive(v) => out.push(v),
                _ => {}
            }
        }
        out
    }
}

/// Parses `expr` and evaluates it against `doc` in one step.
pub fn select<'a>(doc: &'a Value, expr: &str) -> Result<Vec<&'a Value>, SelectorError> {
    Ok(Selector::parse(expr)?.evaluate(doc))
}

/// Renders a primitive claim value as the string conditions compare against.
pub fn claim_string(v: &Value) -> Option<Cow<'_, str>> {
    match v {
        Value::String(s) => Some(Cow::Borrowed(s)),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

fn is_primitive(v: &Value) -> bool {
    matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn step<'a>(v: &'a Value, segment: &Segment) -> Vec<&'a Value> {
    match (segment, v) {
        (Segment::Field(name), Value::Object(map)) => map.get(name).into_iter().collect(),
        (Segment::Index(idx), Value::Array(items)) => {
            let len = items.len() as i64;
            let resolved = if *idx < 0 { len + idx } else { *idx };
            usize::try_from(resolved)
                .ok()
                .and_then(|i| items.get(i))
                .into_iter()
                .collect()
        }
        (Segment::Iterate, Value::Array(items)) => items.iter().collect(),
        (Segment::Iterate, Value::Object(map)) => map.values().collect(),
        _ => Vec::new(),
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn unwrap_shell_escaping(expr: &str) -> Cow<'_, str> {
    let trimmed = expr.trim();
    let unquoted = if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };

    let escaped_quote = unquoted
        .find('"')
        .is_some_and(|i| i > 0 && unquoted.as_bytes()[i - 1] == b'\\');
    if !escaped_quote {
        return Cow::Borrowed(unquoted);
    }

    let mut out = String::with_capacity(unquoted.len());
    let mut chars = unquoted.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

fn path(input: &str) -> IResult<&str, Vec<Segment>> {
    let (input, _) = char('.')(input)?;
    let (input, first) = opt(alt((field, bracket)))(input)?;
    let (input, rest) = many0(alt((preceded(char('.'), alt((field, bracket))), bracket)))(input)?;

    let mut segments = Vec::with_capacity(rest.len() + 1);
    segments.extend(first);
    segments.extend(rest);
    Ok((input, segments))
}

fn field(input: &str) -> IResult<&str, Segment> {
    alt((
        map(identifier, |s: &str| Segment::Field(s.to_string())),
        map(quoted, Segment::Field),
    ))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    value("\\", tag("\\")),
                    value("\"", tag("\"")),
                    value("/", tag("/")),
                    value("\n", tag("n")),
                    value("\t", tag("t")),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn index(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>)(input)
}

fn bracket(input: &str) -> IResult<&str, Segment> {
    delimited(
        pair(char('['), space0),
        alt((
            map(quoted, Segment::Field),
            map(index, Segment::Index),
            success(Segment::Iterate),
        )),
        pair(space0, char(']')),
    )(input)
}

// ============================================================================
// Flattening
// ============================================================================

/// A primitive leaf of a claim document and a selector that reaches it.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedClaim {
    pub selector: String,
    pub value: Value,
}

/// Enumerates every primitive leaf of `doc`.
///
/// Array elements are reported under the array's own path, an indexed path
/// (`.roles[0]`), and a slice path (`.roles[]`), so any selector a subject
/// mapping may use to reach the value appears in the output.
pub fn flatten(doc: &Value) -> Vec<FlattenedClaim> {
    let mut out = Vec::new();
    walk(String::new(), doc, &mut out);
    out
}

/// Returns the distinct selectors produced by [`flatten`].
pub fn selectors(doc: &Value) -> BTreeSet<String> {
    flatten(doc).into_iter().map(|c| c.selector).collect()
}

fn walk(prefix: String, v: &Value, out: &mut Vec<FlattenedClaim>) {
    match v {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                walk(format!("{prefix}{}", field_segment(key)), child, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                if is_primitive(child) {
                    out.push(FlattenedClaim {
                        selector: root_or(&prefix),
                        value: child.clone(),
                    });
                }
                walk(format!("{prefix}[{i}]"), child, out);
                walk(format!("{prefix}[]"), child, out);
            }
        }
        primitive => out.push(FlattenedClaim {
            selector: root_or(&prefix),
            value: primitive.clone(),
        }),
    }
}

fn root_or(prefix: &str) -> String {
    if prefix.is_empty() {
        ".".to_string()
    } else {
        prefix.to_string()
    }
}

fn field_segment(key: &str) -> String {
    let is_identifier = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_identifier {
        format!(".{key}")
    } else {
        let escaped = key.replace('\\', "\\\\").replace('"', "\\\"");
        format!(".\"{escaped}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn strings(values: Vec<&Value>) -> Vec<String> {
        values
            .into_iter()
            .filter_map(|v| claim_string(v).map(Cow::into_owned))
            .collect()
    }

    fn claims() -> Value {
        json!({
            "department": "engineering",
            "level": "senior",
            "roles": ["user", "admin"],
            "clearance": 3,
            "active": true,
            "profile": { "full name": "Ada", "groups": [{ "name": "ops" }, { "name": "dev" }] }
        })
    }

    #[test_case(".department", &["engineering"]; "field")]
    #[test_case(".roles", &["user", "admin"]; "array expands")]
    #[test_case(".roles[0]", &["user"]; "index")]
    #[test_case(".roles[-1]", &["admin"]; "negative index")]
    #[test_case(".roles[]", &["user", "admin"]; "iterate")]
    #[test_case(".profile.groups[].name", &["ops", "dev"]; "iterate then field")]
    #[test_case(".profile[\"full name\"]", &["Ada"]; "bracketed quoted field")]
    #[test_case(".profile.\"full name\"", &["Ada"]; "quoted field")]
    #[test_case(".clearance", &["3"]; "number")]
    #[test_case(".active", &["true"]; "bool")]
    #[test_case("'.roles[1]'", &["admin"]; "single quoted shell escape")]
    #[test_case(".profile.\\\"full name\\\"", &["Ada"]; "backslash shell escape")]
    fn selects(expr: &str, expected: &[&str]) {
        let doc = claims();
        assert_eq!(strings(select(&doc, expr).unwrap()), expected);
    }

    #[test_case(".missing"; "missing field")]
    #[test_case(".roles[7]"; "index out of range")]
    #[test_case(".department[]"; "iterate a scalar")]
    #[test_case(".department.inner"; "field on scalar")]
    #[test_case(".profile"; "object result")]
    fn mismatches_are_empty(expr: &str) {
        let doc = claims();
        assert!(select(&doc, expr).unwrap().is_empty());
    }

    #[test_case("department"; "no leading dot")]
    #[test_case(".a..b"; "double dot")]
    #[test_case(".a[x]"; "non-integer index")]
    #[test_case(".a | .b"; "pipe")]
    #[test_case(".a[0"; "unclosed bracket")]
    #[test_case("length"; "function")]
    fn rejects_malformed(expr: &str) {
        assert!(matches!(
            Selector::parse(expr),
            Err(SelectorError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Selector::parse("   "), Err(SelectorError::Empty));
    }

    #[test]
    fn malformed_reports_offset() {
        match Selector::parse(".a[x]") {
            Err(SelectorError::Malformed { offset, .. }) => assert_eq!(offset, 2),
            other => panic!("expected malformed error, got {other:?}"),
        }
    }

    #[test]
    fn identity_selects_primitive_document() {
        let doc = json!("alice");
        assert_eq!(strings(select(&doc, ".").unwrap()), vec!["alice"]);
    }

    #[test]
    fn flatten_reports_array_paths() {
        let found = selectors(&claims());
        for expected in [
            ".department",
            ".roles",
            ".roles[0]",
            ".roles[1]",
            ".roles[]",
            ".profile.\"full name\"",
            ".profile.groups[0].name",
            ".profile.groups[].name",
        ] {
            assert!(found.contains(expected), "missing {expected}");
        }
    }

    #[test]
    fn flattened_selectors_select_their_values() {
        let doc = claims();
        for claim in flatten(&doc) {
            let selected = select(&doc, &claim.selector).unwrap();
            assert!(
                selected.contains(&&claim.value),
                "{} did not select {}",
                claim.selector,
                claim.value
            );
        }
    }
}
