use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{open_db, Identity};
use crate::error::Result;
use crate::models::AuditEntry;
use crate::receipts::resolve_id;
use crate::settings::load_settings;
use crate::verifier::history;

pub fn run(identity: &Identity, id: &str) -> Result<()> {
    let settings = load_settings();
    let actor = identity.resolve(&settings)?;
    let conn = open_db(&settings)?;
    let id = resolve_id(&conn, id)?;
    let entries = history(&conn, &id, &actor)?;

    if entries.is_empty() {
        println!("{}", format!("No verification history for {id}.").yellow());
        return Ok(());
    }
    println!("{}", format_history(&entries));
    Ok(())
}

pub fn format_history(entries: &[AuditEntry]) -> String {
    let mut table = Table::new();
    table.set_header(vec!["#", "When", "Who", "Action", "Status", "Detail"]);
    for e in entries {
        let from = e.old_values["status"].as_str().unwrap_or("?");
        let to = e.new_values["status"].as_str().unwrap_or("?");
        let detail = e.new_values["rejectionReason"]
            .as_str()
            .or_else(|| e.new_values["notes"].as_str())
            .unwrap_or("");
        table.add_row(vec![
            Cell::new(e.id),
            Cell::new(e.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&e.user_id),
            Cell::new(&e.action),
            Cell::new(format!("{from} -> {to}")),
            Cell::new(detail),
        ]);
    }
    table.to_string()
}
