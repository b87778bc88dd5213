//! Terminal rendering of results

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use mongoz_core::{CollectionResult, ConnectionProfile, DocumentTree, ServerInfo};

/// How documents are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// One canonical document per line
    Compact,
    /// Indented documents
    Pretty,
    /// A table with one column per top-level field
    Table,
}

pub fn render_documents(result: &CollectionResult, format: Format) -> String {
    match format {
        Format::Compact => result
            .documents
            .iter()
            .map(DocumentTree::serialize)
            .collect::<Vec<_>>()
            .join("\n"),
        Format::Pretty => result
            .documents
            .iter()
            .map(DocumentTree::serialize_pretty)
            .collect::<Vec<_>>()
            .join("\n"),
        Format::Table => document_table(&result.documents).to_string(),
    }
}

/// Columns are the top-level keys in the order they first appear
pub fn document_table(documents: &[DocumentTree]) -> Table {
    let mut columns: Vec<&str> = Vec::new();
    for document in documents {
        for key in document.fields().keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut table = new_table();
    table.set_header(columns.clone());
    for document in documents {
        table.add_row(columns.iter().map(|column| {
            document
                .fields()
                .get(*column)
                .map(|node| node.display_value())
                .unwrap_or_default()
        }));
    }
    table
}

pub fn server_table(info: &ServerInfo) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Database", "Collections"]);
    for database in &info.databases {
        table.add_row(vec![database.name.clone(), database.collections.join("\n")]);
    }
    table
}

pub fn profiles_table(profiles: &[ConnectionProfile]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Label", "Endpoints", "User", "Database", "Id"]);
    for profile in profiles {
        table.add_row(vec![
            profile.label.clone().unwrap_or_default(),
            profile.endpoints.join(","),
            profile.username.clone().unwrap_or_default(),
            profile.user_database.clone().unwrap_or_default(),
            profile.id.to_string(),
        ]);
    }
    table
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}
