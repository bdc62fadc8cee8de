//! Terminal rendering and the console status sink

use std::io::{BufRead, Write};

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use gistools_schema::SchemaTree;
use gistools_services::{Confirm, RowState, StatusSink, TableEditSession};

/// Prints every status message to stderr
pub struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn publish(&self, message: &str) {
        tracing::debug!(status = %message, "status");
        eprintln!("{}", message);
    }
}

/// Confirmation read from stdin; only `y`/`yes` agree
pub fn stdin_confirm() -> Confirm {
    std::sync::Arc::new(|prompt: &str| {
        eprint!("{} [y/N] ", prompt);
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(e) => {
                tracing::warn!(error = %e, "could not read confirmation");
                false
            }
        }
    })
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// One line per column, optionally limited to one schema
pub fn render_tree(tree: &SchemaTree, schema_filter: Option<&str>) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        "Schema", "Table", "Column", "Type", "Null", "SRID", "Alias", "Visible",
    ]);

    let schemas = tree
        .schemas
        .iter()
        .filter(|s| schema_filter.is_none_or(|name| s.name == name));
    for schema in schemas {
        if schema.tables.is_empty() {
            table.add_row(vec![schema.name.clone()]);
            continue;
        }
        for node in &schema.tables {
            for column in &node.columns {
                let column_type = match &column.spatial {
                    Some(spatial) => format!("{}({})", column.udt_name, spatial.geometry_type),
                    None => match column.max_length {
                        Some(length) => format!("{}({})", column.data_type, length),
                        None => column.data_type.clone(),
                    },
                };
                table.add_row(vec![
                    schema.name.clone(),
                    node.name.clone(),
                    column.name.clone(),
                    column_type,
                    if column.nullable { "yes" } else { "no" }.to_string(),
                    column
                        .spatial
                        .as_ref()
                        .map(|s| s.srid.to_string())
                        .unwrap_or_default(),
                    column.display.alias.clone(),
                    if column.display.visible { "yes" } else { "no" }.to_string(),
                ]);
            }
        }
    }
    table
}

/// Loaded rows with a row-index column; pending edits are marked
pub fn render_session(session: &TableEditSession) -> Table {
    let mut table = new_table();
    let mut header = vec!["#".to_string()];
    header.extend(session.column_names().into_iter().map(str::to_string));
    table.set_header(header);

    for (index, row) in session.rows().iter().enumerate() {
        let marker = match row.state() {
            RowState::Unchanged => "",
            RowState::Inserted => "+",
            RowState::Modified => "*",
            RowState::Deleted => "-",
        };
        let mut cells = vec![format!("{}{}", index, marker)];
        cells.extend(row.values.iter().map(|value| value.to_string()));
        table.add_row(cells);
    }
    table
}
