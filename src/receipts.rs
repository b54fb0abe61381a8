use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::error::{HaulbookError, Result};
use crate::models::{AuditEntry, Category, Expense, ParsedReceipt, Receipt, ReceiptStatus, VerifiedData};
use crate::workflow::ReceiptState;

const RECEIPT_COLUMNS: &str = "id, storage_key, original_filename, file_size, uploaded_by, trip_id, \
     vehicle_id, status, amount, currency, category, description, merchant, receipt_date, \
     approved_by, approved_at, rejection_reason, metadata, uploaded_at";

const OPEN_STATUSES: &str = "('PENDING', 'PROCESSING')";

fn receipt_from_row(row: &Row<'_>) -> rusqlite::Result<Receipt> {
    let status: ReceiptStatus = row.get(7)?;
    let metadata: Value = row.get(17)?;
    let verified: VerifiedData = match metadata.get("verifiedData") {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(17, Type::Text, Box::new(e)))?,
        None => VerifiedData::default(),
    };
    let state = ReceiptState::from_columns(status, row.get(14)?, row.get(15)?, row.get(16)?, verified)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(Receipt {
        id: row.get(0)?,
        storage_key: row.get(1)?,
        original_filename: row.get(2)?,
        file_size: row.get(3)?,
        uploaded_by: row.get(4)?,
        trip_id: row.get(5)?,
        vehicle_id: row.get(6)?,
        state,
        amount: row.get(8)?,
        currency: row.get(9)?,
        category: row.get(10)?,
        description: row.get(11)?,
        merchant: row.get(12)?,
        receipt_date: row.get(13)?,
        metadata,
        uploaded_at: row.get(18)?,
    })
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

pub struct NewReceipt<'a> {
    pub id: &'a str,
    pub storage_key: &'a str,
    pub original_filename: &'a str,
    pub file_size: Option<i64>,
    pub uploaded_by: &'a str,
    pub trip_id: Option<&'a str>,
    pub vehicle_id: Option<&'a str>,
    pub status: ReceiptStatus,
    pub description: Option<&'a str>,
    pub metadata: &'a Value,
    pub uploaded_at: DateTime<Utc>,
}

pub fn insert_receipt(conn: &Connection, new: &NewReceipt<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO receipts (id, storage_key, original_filename, file_size, uploaded_by, trip_id, \
         vehicle_id, status, description, metadata, uploaded_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            new.id,
            new.storage_key,
            new.original_filename,
            new.file_size,
            new.uploaded_by,
            new.trip_id,
            new.vehicle_id,
            new.status,
            new.description,
            new.metadata,
            new.uploaded_at,
        ],
    )?;
    Ok(())
}

pub fn find_receipt(conn: &Connection, id: &str) -> Result<Option<Receipt>> {
    let receipt = conn
        .query_row(
            &format!("SELECT {RECEIPT_COLUMNS} FROM receipts WHERE id = ?1"),
            [id],
            receipt_from_row,
        )
        .optional()?;
    Ok(receipt)
}

pub fn get_receipt(conn: &Connection, id: &str) -> Result<Receipt> {
    find_receipt(conn, id)?.ok_or_else(|| HaulbookError::ReceiptNotFound(id.to_string()))
}

/// Expand a unique id prefix (as printed in listings) to the full id.
pub fn resolve_id(conn: &Connection, prefix: &str) -> Result<String> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err(HaulbookError::ReceiptNotFound(prefix.to_string()));
    }
    let mut stmt =
        conn.prepare("SELECT id FROM receipts WHERE substr(id, 1, length(?1)) = ?1 LIMIT 2")?;
    let ids = stmt
        .query_map([prefix], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match ids.as_slice() {
        [id] => Ok(id.clone()),
        [] => Err(HaulbookError::ReceiptNotFound(prefix.to_string())),
        _ => Err(HaulbookError::Other(format!(
            "receipt id prefix '{prefix}' is ambiguous"
        ))),
    }
}

pub fn list_by_status(conn: &Connection, status: ReceiptStatus) -> Result<Vec<Receipt>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE status = ?1 ORDER BY uploaded_at, id"
    ))?;
    let rows = stmt
        .query_map([status], receipt_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Attach OCR output to a `PROCESSING` receipt and move it to `PENDING`.
/// Values the uploader already supplied are kept. Returns false when the
/// receipt was not in `PROCESSING`.
pub fn attach_ocr(
    conn: &Connection,
    id: &str,
    parsed: Option<&ParsedReceipt>,
    metadata: &Value,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE receipts SET status = 'PENDING', \
         amount = COALESCE(amount, ?2), category = COALESCE(category, ?3), \
         merchant = COALESCE(merchant, ?4), receipt_date = COALESCE(receipt_date, ?5), \
         metadata = ?6 \
         WHERE id = ?1 AND status = 'PROCESSING'",
        params![
            id,
            parsed.map(|p| p.amount),
            parsed.map(|p| p.category),
            parsed.map(|p| p.merchant_name.as_str()),
            parsed.map(|p| p.date),
            metadata,
        ],
    )?;
    Ok(changed == 1)
}

/// Final values written by a verification decision.
pub struct Decision<'a> {
    pub status: ReceiptStatus,
    pub approved_by: &'a str,
    pub approved_at: DateTime<Utc>,
    pub amount: Option<f64>,
    pub currency: &'a str,
    pub category: Option<Category>,
    pub description: Option<&'a str>,
    pub merchant: Option<&'a str>,
    pub receipt_date: Option<NaiveDate>,
    pub rejection_reason: Option<&'a str>,
    pub metadata: &'a Value,
}

/// Compare-and-swap on status: the row is only written while it is still
/// `PENDING` or `PROCESSING`. Returns false when nothing was written.
pub fn record_decision(conn: &Connection, id: &str, decision: &Decision<'_>) -> Result<bool> {
    let changed = conn.execute(
        &format!(
            "UPDATE receipts SET status = ?2, approved_by = ?3, approved_at = ?4, amount = ?5, \
             currency = ?6, category = ?7, description = ?8, merchant = ?9, receipt_date = ?10, \
             rejection_reason = ?11, metadata = ?12 \
             WHERE id = ?1 AND status IN {OPEN_STATUSES}"
        ),
        params![
            id,
            decision.status,
            decision.approved_by,
            decision.approved_at,
            decision.amount,
            decision.currency,
            decision.category,
            decision.description,
            decision.merchant,
            decision.receipt_date,
            decision.rejection_reason,
            decision.metadata,
        ],
    )?;
    Ok(changed == 1)
}

pub fn status_counts(conn: &Connection) -> Result<Vec<(ReceiptStatus, i64)>> {
    let mut stmt =
        conn.prepare("SELECT status, count(*) FROM receipts GROUP BY status ORDER BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Pending queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PendingFilter {
    pub category: Option<Category>,
    pub uploaded_from: Option<NaiveDate>,
    pub uploaded_to: Option<NaiveDate>,
    pub page: u32,
    pub limit: u32,
}

impl Default for PendingFilter {
    fn default() -> Self {
        Self {
            category: None,
            uploaded_from: None,
            uploaded_to: None,
            page: 1,
            limit: 20,
        }
    }
}

#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> i64 {
        if self.limit == 0 {
            return 0;
        }
        (self.total + self.limit as i64 - 1) / self.limit as i64
    }
}

/// `PENDING` receipts, oldest upload first.
pub fn list_pending(conn: &Connection, filter: &PendingFilter) -> Result<Page<Receipt>> {
    let page = filter.page.max(1);
    let limit = filter.limit.clamp(1, 200);

    let mut clauses = vec!["status = 'PENDING'".to_string()];
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(category) = filter.category {
        args.push(Box::new(category));
        clauses.push(format!("category = ?{}", args.len()));
    }
    if let Some(from) = filter.uploaded_from {
        args.push(Box::new(from));
        clauses.push(format!("substr(uploaded_at, 1, 10) >= ?{}", args.len()));
    }
    if let Some(to) = filter.uploaded_to {
        args.push(Box::new(to));
        clauses.push(format!("substr(uploaded_at, 1, 10) <= ?{}", args.len()));
    }
    let where_sql = clauses.join(" AND ");

    let total: i64 = conn.query_row(
        &format!("SELECT count(*) FROM receipts WHERE {where_sql}"),
        params_from_iter(args.iter()),
        |row| row.get(0),
    )?;

    let n = args.len();
    args.push(Box::new(limit as i64));
    args.push(Box::new(((page - 1) as i64) * limit as i64));
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE {where_sql} \
         ORDER BY uploaded_at, id LIMIT ?{} OFFSET ?{}",
        n + 1,
        n + 2
    ))?;
    let items = stmt
        .query_map(params_from_iter(args.iter()), receipt_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total,
        page,
        limit,
    })
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

pub struct NewAuditEntry<'a> {
    pub user_id: &'a str,
    pub action: &'a str,
    pub entity: &'a str,
    pub entity_id: &'a str,
    pub old_values: &'a Value,
    pub new_values: &'a Value,
    pub created_at: DateTime<Utc>,
}

pub fn append_audit(conn: &Connection, entry: &NewAuditEntry<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO audit_log (user_id, action, entity, entity_id, old_values, new_values, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.user_id,
            entry.action,
            entry.entity,
            entry.entity_id,
            entry.old_values,
            entry.new_values,
            entry.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Audit entries for one receipt, newest first.
pub fn audit_history(conn: &Connection, receipt_id: &str) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, action, entity, entity_id, old_values, new_values, created_at \
         FROM audit_log WHERE entity = 'Receipt' AND entity_id = ?1 \
         ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map([receipt_id], |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                user_id: row.get(1)?,
                action: row.get(2)?,
                entity: row.get(3)?,
                entity_id: row.get(4)?,
                old_values: row.get::<_, Option<Value>>(5)?.unwrap_or(Value::Null),
                new_values: row.get::<_, Option<Value>>(6)?.unwrap_or(Value::Null),
                created_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Expenses
// ---------------------------------------------------------------------------

pub struct NewExpense<'a> {
    pub amount: f64,
    pub currency: &'a str,
    pub category: Category,
    pub description: &'a str,
    pub expense_date: NaiveDate,
    pub trip_id: Option<&'a str>,
    pub vehicle_id: Option<&'a str>,
    pub user_id: &'a str,
    pub receipt_key: Option<&'a str>,
    pub approved_by: &'a str,
    pub approved_at: DateTime<Utc>,
    pub source_receipt_id: &'a str,
}

pub fn insert_expense(conn: &Connection, expense: &NewExpense<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO expenses (amount, currency, category, description, expense_date, trip_id, \
         vehicle_id, user_id, receipt_key, approved_by, approved_at, source_receipt_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            expense.amount,
            expense.currency,
            expense.category,
            expense.description,
            expense.expense_date,
            expense.trip_id,
            expense.vehicle_id,
            expense.user_id,
            expense.receipt_key,
            expense.approved_by,
            expense.approved_at,
            expense.source_receipt_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_expenses(
    conn: &Connection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "SELECT id, amount, currency, category, description, expense_date, trip_id, vehicle_id, \
         user_id, receipt_key, approved_by, approved_at, source_receipt_id \
         FROM expenses \
         WHERE (?1 IS NULL OR expense_date >= ?1) AND (?2 IS NULL OR expense_date <= ?2) \
         ORDER BY expense_date, id",
    )?;
    let rows = stmt
        .query_map(params![from, to], |row| {
            Ok(Expense {
                id: row.get(0)?,
                amount: row.get(1)?,
                currency: row.get(2)?,
                category: row.get(3)?,
                description: row.get(4)?,
                expense_date: row.get(5)?,
                trip_id: row.get(6)?,
                vehicle_id: row.get(7)?,
                user_id: row.get(8)?,
                receipt_key: row.get(9)?,
                approved_by: row.get(10)?,
                approved_at: row.get(11)?,
                source_receipt_id: row.get(12)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use serde_json::json;

    fn add_receipt(conn: &Connection, id: &str, status: ReceiptStatus, uploaded_at: &str) {
        let metadata = json!({ "originalFilename": format!("{id}.jpg") });
        let uploaded_at = DateTime::parse_from_rfc3339(uploaded_at)
            .unwrap()
            .with_timezone(&Utc);
        insert_receipt(
            conn,
            &NewReceipt {
                id,
                storage_key: &format!("receipts/2025-09-17/user-u1/{id}.jpg"),
                original_filename: &format!("{id}.jpg"),
                file_size: Some(2048),
                uploaded_by: "u1",
                trip_id: Some("trip-1"),
                vehicle_id: None,
                status,
                description: None,
                metadata: &metadata,
                uploaded_at,
            },
        )
        .unwrap();
    }

    fn decision<'a>(status: ReceiptStatus, metadata: &'a Value) -> Decision<'a> {
        Decision {
            status,
            approved_by: "mgr",
            approved_at: Utc::now(),
            amount: Some(10.0),
            currency: "USD",
            category: Some(Category::Fuel),
            description: None,
            merchant: Some("Shell"),
            receipt_date: None,
            rejection_reason: None,
            metadata,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let (_dir, conn) = test_db();
        add_receipt(&conn, "r1", ReceiptStatus::Pending, "2025-09-17T10:00:00Z");
        let receipt = get_receipt(&conn, "r1").unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Pending);
        assert_eq!(receipt.currency, "USD");
        assert_eq!(receipt.trip_id.as_deref(), Some("trip-1"));
        assert_eq!(receipt.metadata["originalFilename"], "r1.jpg");
    }

    #[test]
    fn test_get_missing_receipt() {
        let (_dir, conn) = test_db();
        assert!(matches!(
            get_receipt(&conn, "nope"),
            Err(HaulbookError::ReceiptNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_id_prefix() {
        let (_dir, conn) = test_db();
        add_receipt(&conn, "abc123", ReceiptStatus::Pending, "2025-09-17T10:00:00Z");
        add_receipt(&conn, "abd456", ReceiptStatus::Pending, "2025-09-17T10:00:00Z");
        assert_eq!(resolve_id(&conn, "abc").unwrap(), "abc123");
        assert_eq!(resolve_id(&conn, "abd456").unwrap(), "abd456");
        assert!(matches!(resolve_id(&conn, "ab"), Err(HaulbookError::Other(_))));
        assert!(matches!(
            resolve_id(&conn, "zzz"),
            Err(HaulbookError::ReceiptNotFound(_))
        ));
    }

    #[test]
    fn test_attach_ocr_keeps_uploader_values() {
        let (_dir, conn) = test_db();
        add_receipt(&conn, "r1", ReceiptStatus::Processing, "2025-09-17T10:00:00Z");
        conn.execute("UPDATE receipts SET amount = 99.0 WHERE id = 'r1'", []).unwrap();
        let parsed = ParsedReceipt {
            merchant_name: "Shell Gas Station".to_string(),
            amount: 45.67,
            date: NaiveDate::from_ymd_opt(2025, 9, 17).unwrap(),
            category: Category::Fuel,
            confidence: 0.95,
            raw_text: "Shell Gas Station".to_string(),
        };
        let metadata = json!({ "ocr": parsed });
        assert!(attach_ocr(&conn, "r1", Some(&parsed), &metadata).unwrap());
        let receipt = get_receipt(&conn, "r1").unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Pending);
        assert_eq!(receipt.amount, Some(99.0));
        assert_eq!(receipt.category, Some(Category::Fuel));
        assert_eq!(receipt.merchant.as_deref(), Some("Shell Gas Station"));

        // Already pending: nothing to attach to.
        assert!(!attach_ocr(&conn, "r1", Some(&parsed), &metadata).unwrap());
    }

    #[test]
    fn test_record_decision_is_compare_and_swap() {
        let (_dir, conn) = test_db();
        add_receipt(&conn, "r1", ReceiptStatus::Pending, "2025-09-17T10:00:00Z");
        let metadata = json!({});
        assert!(record_decision(&conn, "r1", &decision(ReceiptStatus::Approved, &metadata)).unwrap());
        let mut second = decision(ReceiptStatus::Rejected, &metadata);
        second.rejection_reason = Some("late");
        assert!(!record_decision(&conn, "r1", &second).unwrap());
        let receipt = get_receipt(&conn, "r1").unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Approved);
        assert_eq!(receipt.state.approver(), Some("mgr"));
    }

    #[test]
    fn test_list_pending_filters_and_pages() {
        let (_dir, conn) = test_db();
        add_receipt(&conn, "a", ReceiptStatus::Pending, "2025-09-15T08:00:00Z");
        add_receipt(&conn, "b", ReceiptStatus::Pending, "2025-09-16T08:00:00Z");
        add_receipt(&conn, "c", ReceiptStatus::Pending, "2025-09-17T08:00:00Z");
        add_receipt(&conn, "d", ReceiptStatus::Processing, "2025-09-17T09:00:00Z");
        conn.execute("UPDATE receipts SET category = 'fuel' WHERE id IN ('a', 'c')", []).unwrap();

        let all = list_pending(&conn, &PendingFilter::default()).unwrap();
        assert_eq!(all.total, 3);
        let ids: Vec<&str> = all.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);

        let fuel = list_pending(
            &conn,
            &PendingFilter {
                category: Some(Category::Fuel),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(fuel.total, 2);

        let ranged = list_pending(
            &conn,
            &PendingFilter {
                uploaded_from: NaiveDate::from_ymd_opt(2025, 9, 16),
                uploaded_to: NaiveDate::from_ymd_opt(2025, 9, 16),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ranged.items.len(), 1);
        assert_eq!(ranged.items[0].id, "b");

        let second_page = list_pending(
            &conn,
            &PendingFilter {
                page: 2,
                limit: 2,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(second_page.items.len(), 1);
        assert_eq!(second_page.items[0].id, "c");
        assert_eq!(second_page.total_pages(), 2);
    }

    #[test]
    fn test_audit_history_newest_first() {
        let (_dir, conn) = test_db();
        let old = json!({ "status": "PENDING" });
        let new = json!({ "status": "APPROVED" });
        for (action, ts) in [("RECEIPT_UPDATED", 1), ("RECEIPT_APPROVED", 2)] {
            append_audit(
                &conn,
                &NewAuditEntry {
                    user_id: "mgr",
                    action,
                    entity: "Receipt",
                    entity_id: "r1",
                    old_values: &old,
                    new_values: &new,
                    created_at: DateTime::from_timestamp(1_750_000_000 + ts, 0).unwrap(),
                },
            )
            .unwrap();
        }
        let history = audit_history(&conn, "r1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, "RECEIPT_APPROVED");
        assert_eq!(history[1].old_values["status"], "PENDING");
    }

    #[test]
    fn test_list_expenses_by_date() {
        let (_dir, conn) = test_db();
        add_receipt(&conn, "r1", ReceiptStatus::Approved, "2025-09-17T10:00:00Z");
        add_receipt(&conn, "r2", ReceiptStatus::Approved, "2025-09-17T10:00:00Z");
        for (source, day) in [("r1", 1), ("r2", 20)] {
            insert_expense(
                &conn,
                &NewExpense {
                    amount: 12.5,
                    currency: "USD",
                    category: Category::Meals,
                    description: "lunch",
                    expense_date: NaiveDate::from_ymd_opt(2025, 9, day).unwrap(),
                    trip_id: None,
                    vehicle_id: None,
                    user_id: "u1",
                    receipt_key: None,
                    approved_by: "mgr",
                    approved_at: Utc::now(),
                    source_receipt_id: source,
                },
            )
            .unwrap();
        }
        let all = list_expenses(&conn, None, None).unwrap();
        assert_eq!(all.len(), 2);
        let early = list_expenses(&conn, None, NaiveDate::from_ymd_opt(2025, 9, 10)).unwrap();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].source_receipt_id, "r1");
        assert_eq!(early[0].category, Category::Meals);
    }
}
