use chrono::NaiveDate;
use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{open_db, short_id, Identity};
use crate::error::Result;
use crate::fmt::amount;
use crate::models::{Category, Receipt};
use crate::receipts::PendingFilter;
use crate::settings::load_settings;
use crate::verifier::pending_queue;

pub fn run(
    identity: &Identity,
    category: Option<Category>,
    from_date: Option<NaiveDate>,
    to_date: Option<NaiveDate>,
    page: u32,
    limit: u32,
) -> Result<()> {
    let settings = load_settings();
    let actor = identity.resolve(&settings)?;
    let conn = open_db(&settings)?;
    let filter = PendingFilter {
        category,
        uploaded_from: from_date,
        uploaded_to: to_date,
        page,
        limit,
    };
    let result = pending_queue(&conn, &filter, &actor)?;

    if result.total == 0 {
        println!("{}", "No receipts waiting for review.".green());
        return Ok(());
    }

    println!("{}", format_queue(&result.items));
    println!(
        "Page {}/{} ({} pending)",
        result.page,
        result.total_pages(),
        result.total
    );
    Ok(())
}

pub fn format_queue(receipts: &[Receipt]) -> String {
    let mut table = Table::new();
    table.set_header(vec!["ID", "Uploaded", "By", "Merchant", "Amount", "Category", "Trip"]);
    for r in receipts {
        table.add_row(vec![
            Cell::new(short_id(&r.id)),
            Cell::new(r.uploaded_at.format("%Y-%m-%d %H:%M")),
            Cell::new(&r.uploaded_by),
            Cell::new(r.merchant.as_deref().unwrap_or("-")),
            Cell::new(amount(r.amount, &r.currency)),
            Cell::new(r.category.map(|c| c.as_str()).unwrap_or("-")),
            Cell::new(r.trip_id.as_deref().unwrap_or("")),
        ]);
    }
    table.to_string()
}
