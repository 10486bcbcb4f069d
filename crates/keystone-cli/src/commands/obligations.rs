//! Obligations command implementation.

use anyhow::{Context, Result};
use comfy_table::Cell;
use keystone_pdp::ResourceObligations;
use keystone_types::Action;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{Session, print_json, request_context, resources};
use crate::style::{flag_cell, print_labeled, print_table, result_table};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObligationsReport {
    all_fulfilled: bool,
    per_resource: Vec<ResourceObligations>,
}

pub fn run(
    session: &Session,
    action: &str,
    resource_fqns: &[String],
    client_id: Option<String>,
    fulfill: Vec<String>,
) -> Result<()> {
    let pdp = session.pdp()?;
    let fulfillable = session.fulfillable(fulfill);

    let (all_fulfilled, per_resource) = pdp
        .get_all_triggered_obligations_are_fulfilled(
            &resources(resource_fqns),
            &Action::new(action),
            &request_context(client_id),
            &fulfillable,
            &CancellationToken::new(),
        )
        .context("Obligation lookup failed")?;

    if session.json {
        return print_json(&ObligationsReport {
            all_fulfilled,
            per_resource,
        });
    }

    let mut table = result_table(&["Resource", "Obligation", "Fulfillable"]);
    for resource in &per_resource {
        for fqn in &resource.obligation_value_fqns {
            table.add_row(vec![
                Cell::new(&resource.resource_id),
                Cell::new(fqn),
                flag_cell(fulfillable.contains(fqn)),
            ]);
        }
    }
    print_table(&table, "No obligations triggered.");
    print_labeled("All fulfilled", if all_fulfilled { "yes" } else { "no" });
    Ok(())
}
