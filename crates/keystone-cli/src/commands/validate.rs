//! Validate command implementation.

use anyhow::Result;
use keystone_pdp::PdpSet;
use serde::Serialize;

use super::{Session, print_json};
use crate::style::{print_error, print_labeled, print_success};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationReport {
    valid: bool,
    attribute_values: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(session: &Session) -> Result<()> {
    let path = session.policy_path()?;
    let store = session.store()?;

    match PdpSet::load(store.as_ref()) {
        Ok(set) => {
            let attribute_values = set.entitlements.attributes().len();
            if session.json {
                return print_json(&ValidationReport {
                    valid: true,
                    attribute_values,
                    error: None,
                });
            }
            print_success(&format!("{} is a valid policy", path.display()));
            print_labeled("Attribute values", &attribute_values.to_string());
            Ok(())
        }
        Err(e) => {
            if session.json {
                print_json(&ValidationReport {
                    valid: false,
                    attribute_values: 0,
                    error: Some(e.to_string()),
                })?;
            } else {
                print_error(&format!("{} is not a valid policy: {e}", path.display()));
            }
            Err(e.into())
        }
    }
}
