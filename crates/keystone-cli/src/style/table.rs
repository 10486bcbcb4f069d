//! Table formatting using comfy-table.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

use super::colors::SemanticStyle;

/// Creates a styled table with a bold header row.
pub fn result_table(columns: &[&str]) -> Table {
    let mut table = Table::new();

    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = columns
        .iter()
        .map(|col| {
            if super::no_color() {
                Cell::new(col)
            } else {
                Cell::new(col)
                    .add_attribute(Attribute::Bold)
                    .fg(Color::Cyan)
            }
        })
        .collect();
    table.set_header(header_cells);

    table
}

/// A yes/no cell, green for yes and red for no.
pub fn flag_cell(value: bool) -> Cell {
    let text = if value { "yes" } else { "no" };
    if super::no_color() {
        Cell::new(text)
    } else if value {
        Cell::new(text).fg(Color::Green)
    } else {
        Cell::new(text).fg(Color::Red)
    }
}

/// Prints `table`, or `empty` when it has no rows.
pub fn print_table(table: &Table, empty: &str) {
    if table.row_iter().next().is_none() {
        println!("{}", empty.muted());
        return;
    }
    println!("{table}");

    let count = table.row_iter().count();
    let row_word = if count == 1 { "row" } else { "rows" };
    println!("{}", format!("({count} {row_word})").muted());
}
