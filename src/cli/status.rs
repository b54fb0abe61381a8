use crate::db::get_connection;
use crate::error::Result;
use crate::fmt::format_bytes;
use crate::models::ReceiptStatus;
use crate::receipts::{list_expenses, status_counts};
use crate::settings::load_settings;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();

    println!("User:       {}", if settings.user_id.is_empty() { "(not set)" } else { &settings.user_id });
    println!("Role:       {}", settings.role);
    println!("OCR:        {}", settings.ocr_provider);
    println!("Data dir:   {}", settings.data_dir);
    println!("Database:   {}", db_path.display());

    if db_path.exists() {
        let size = std::fs::metadata(&db_path)?.len();
        println!("DB size:    {}", format_bytes(size));

        let conn = get_connection(&db_path)?;
        let counts = status_counts(&conn)?;
        let count = |status: ReceiptStatus| {
            counts
                .iter()
                .find(|(s, _)| *s == status)
                .map(|(_, n)| *n)
                .unwrap_or(0)
        };
        let expenses = list_expenses(&conn, None, None)?;
        let total: f64 = expenses.iter().map(|e| e.amount).sum();

        println!();
        println!("Processing:  {}", count(ReceiptStatus::Processing));
        println!("Pending:     {}", count(ReceiptStatus::Pending));
        println!("Approved:    {}", count(ReceiptStatus::Approved));
        println!("Rejected:    {}", count(ReceiptStatus::Rejected));
        println!("Expenses:    {} ({})", expenses.len(), crate::fmt::money(total));
    } else {
        println!();
        println!("Database not found. Run `haulbook init` to set up.");
    }

    Ok(())
}
