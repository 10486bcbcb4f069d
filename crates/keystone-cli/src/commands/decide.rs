//! Decide command implementation.

use anyhow::{Context, Result};
use comfy_table::Cell;
use keystone_types::Action;
use tokio_util::sync::CancellationToken;

use super::{Requester, Session, print_json, request_context, resources};
use crate::style::{flag_cell, print_table, print_verdict, print_warn, result_table};

pub fn run(
    session: &Session,
    requester: &Requester,
    action: &str,
    resource_fqns: &[String],
    client_id: Option<String>,
    fulfill: Vec<String>,
) -> Result<()> {
    let pdp = session.pdp()?;
    let identifier = requester.identifier()?;
    let fulfillable = session.fulfillable(fulfill);

    let decision = pdp
        .get_decision(
            &identifier,
            &Action::new(action),
            &resources(resource_fqns),
            &request_context(client_id),
            &fulfillable,
            &CancellationToken::new(),
        )
        .context("Decision failed")?;

    if session.json {
        return print_json(&decision);
    }

    let mut table = result_table(&["Resource", "Entitled", "Obligations met", "Passed", "Obligations"]);
    for result in &decision.results {
        table.add_row(vec![
            Cell::new(&result.resource_id),
            flag_cell(result.entitled),
            flag_cell(result.obligations_satisfied),
            flag_cell(result.passed),
            Cell::new(result.required_obligations.join("\n")),
        ]);
    }
    print_table(&table, "No resources decided.");

    if decision
        .results
        .iter()
        .any(|r| r.entitled && !r.obligations_satisfied)
    {
        print_warn("Entitled, but the PEP cannot fulfil every triggered obligation");
    }
    print_verdict(decision.access);
    Ok(())
}
