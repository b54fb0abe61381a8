use std::path::Path;

use chrono::NaiveDate;

use crate::cli::{open_db, Identity};
use crate::error::Result;
use crate::fmt::money;
use crate::models::Expense;
use crate::receipts::list_expenses;
use crate::settings::load_settings;

pub fn run(
    identity: &Identity,
    from_date: Option<NaiveDate>,
    to_date: Option<NaiveDate>,
    output: &str,
) -> Result<()> {
    let settings = load_settings();
    let actor = identity.resolve(&settings)?;
    actor.ensure_can_verify()?;
    let conn = open_db(&settings)?;

    let expenses = list_expenses(&conn, from_date, to_date)?;
    write_csv(Path::new(output), &expenses)?;

    let total: f64 = expenses.iter().map(|e| e.amount).sum();
    println!(
        "Exported {} expenses ({}) to {output}",
        expenses.len(),
        money(total)
    );
    Ok(())
}

pub fn write_csv(path: &Path, expenses: &[Expense]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "date",
        "amount",
        "currency",
        "category",
        "description",
        "trip_id",
        "vehicle_id",
        "user_id",
        "approved_by",
        "approved_at",
        "receipt_id",
        "receipt_key",
    ])?;
    for e in expenses {
        wtr.write_record([
            e.expense_date.to_string(),
            format!("{:.2}", e.amount),
            e.currency.clone(),
            e.category.to_string(),
            e.description.clone(),
            e.trip_id.clone().unwrap_or_default(),
            e.vehicle_id.clone().unwrap_or_default(),
            e.user_id.clone(),
            e.approved_by.clone(),
            e.approved_at.to_rfc3339(),
            e.source_receipt_id.clone(),
            e.receipt_key.clone().unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
