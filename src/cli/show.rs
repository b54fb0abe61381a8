use colored::Colorize;

use crate::cli::{ensure_can_view, open_db, Identity};
use crate::error::Result;
use crate::fmt::{amount, format_bytes};
use crate::models::Receipt;
use crate::receipts::{get_receipt, resolve_id};
use crate::settings::load_settings;
use crate::workflow::ReceiptState;

pub fn run(identity: &Identity, id: &str) -> Result<()> {
    let settings = load_settings();
    let actor = identity.resolve(&settings)?;
    let conn = open_db(&settings)?;
    let receipt = get_receipt(&conn, &resolve_id(&conn, id)?)?;
    ensure_can_view(&actor, &receipt)?;
    print!("{}", format_receipt(&receipt));
    Ok(())
}

pub fn format_receipt(r: &Receipt) -> String {
    let mut out = String::new();
    let mut line = |label: &str, value: &str| {
        out.push_str(&format!("  {:<13}{value}\n", format!("{label}:")));
    };

    line("Receipt", &r.id);
    line("Status", &status_label(&r.state));
    line("File", &format!(
        "{} ({})",
        r.original_filename,
        r.file_size.map(|n| format_bytes(n as u64)).unwrap_or_else(|| "-".to_string())
    ));
    line("Key", &r.storage_key);
    line("Uploaded", &format!("{} by {}", r.uploaded_at.format("%Y-%m-%d %H:%M"), r.uploaded_by));
    if let Some(trip) = &r.trip_id {
        line("Trip", trip);
    }
    if let Some(vehicle) = &r.vehicle_id {
        line("Vehicle", vehicle);
    }
    line("Merchant", r.merchant.as_deref().unwrap_or("-"));
    line("Amount", &amount(r.amount, &r.currency));
    line("Category", r.category.map(|c| c.as_str()).unwrap_or("-"));
    line("Date", &r.receipt_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()));
    if let Some(description) = &r.description {
        line("Description", description);
    }

    if let (Some(approver), Some(at)) = (r.state.approver(), r.state.decided_at()) {
        let label = if r.state.rejection_reason().is_some() { "Rejected" } else { "Approved" };
        line(label, &format!("{} by {approver}", at.format("%Y-%m-%d %H:%M")));
    }
    if let Some(reason) = r.state.rejection_reason() {
        line("Reason", reason);
    }

    if let Some(confidence) = r.metadata["ocr"]["confidence"].as_f64() {
        line("OCR", &format!("{:.0}% confidence", confidence * 100.0));
    }
    if let Some(err) = r.metadata["ocrError"].as_str() {
        line("OCR error", err);
    }
    if let Some(notes) = r.metadata["notes"].as_str() {
        line("Notes", notes);
    }
    out
}

fn status_label(state: &ReceiptState) -> String {
    let s = state.status().as_str();
    match state {
        ReceiptState::Pending => s.cyan().to_string(),
        ReceiptState::Processing => s.yellow().to_string(),
        ReceiptState::Approved { .. } => s.green().to_string(),
        ReceiptState::Rejected { .. } => s.red().to_string(),
    }
}
