//! Entitlements command implementation.

use anyhow::{Context, Result};
use comfy_table::Cell;
use tokio_util::sync::CancellationToken;

use super::{Requester, Session, print_json};
use crate::style::{print_error, print_table, result_table};

/// `comprehensive` widens the configured default; it never narrows it.
pub fn run(session: &Session, requester: &Requester, comprehensive: bool) -> Result<()> {
    let pdp = session.pdp()?;
    let identifier = requester.identifier()?;
    let comprehensive = comprehensive || session.config.decision.comprehensive_hierarchy;

    let entitlements = pdp
        .get_entitlements(&identifier, comprehensive, &CancellationToken::new())
        .context("Entitlement resolution failed")?;

    if session.json {
        return print_json(&entitlements);
    }

    let mut table = result_table(&["Entity", "Attribute value", "Actions"]);
    for entity in &entitlements {
        if let Some(error) = &entity.error {
            print_error(&format!("{}: {error}", entity.entity_id));
            continue;
        }
        for (fqn, actions) in &entity.actions_per_attribute_value_fqn {
            let names: Vec<&str> = actions.iter().map(|a| a.name.as_str()).collect();
            table.add_row(vec![
                Cell::new(&entity.entity_id),
                Cell::new(fqn),
                Cell::new(names.join(", ")),
            ]);
        }
    }
    print_table(&table, "No entitlements.");
    Ok(())
}
