use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde_json::{json, Map, Value};

use crate::error::{HaulbookError, Result};
use crate::fmt::money;
use crate::models::{Actor, AuditEntry, Category, Receipt, ReceiptStatus, VerifiedData};
use crate::receipts::{
    append_audit, audit_history, find_receipt, get_receipt, insert_expense, list_pending,
    record_decision, Decision, NewAuditEntry, NewExpense, Page, PendingFilter,
};
use crate::workflow::VerifyAction;

pub const MAX_BULK: usize = 50;

/// Message for the driver who uploaded a receipt once it has been decided.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub recipient: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub receipt_id: String,
}

#[derive(Debug)]
pub struct Verification {
    pub receipt: Receipt,
    pub audit_id: i64,
    pub expense_id: Option<i64>,
    pub notification: Notification,
}

#[derive(Debug)]
pub struct BulkItem {
    pub receipt_id: String,
    pub outcome: std::result::Result<ReceiptStatus, String>,
}

#[derive(Debug)]
pub struct BulkResult {
    pub items: Vec<BulkItem>,
}

impl BulkResult {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_ok()).count()
    }
}

pub fn verify(
    conn: &Connection,
    receipt_id: &str,
    action: &VerifyAction,
    actor: &Actor,
) -> Result<Verification> {
    verify_at(conn, receipt_id, action, actor, Utc::now())
}

pub fn verify_at(
    conn: &Connection,
    receipt_id: &str,
    action: &VerifyAction,
    actor: &Actor,
    at: DateTime<Utc>,
) -> Result<Verification> {
    actor.ensure_can_verify()?;
    let verification = decide(conn, receipt_id, action, actor, at, false)?;
    deliver(&verification.notification);
    Ok(verification)
}

/// Apply one action to up to [`MAX_BULK`] receipts. Each receipt is decided
/// in its own transaction; a failure is recorded and the rest continue.
pub fn bulk_verify(
    conn: &Connection,
    receipt_ids: &[String],
    action: &VerifyAction,
    actor: &Actor,
) -> Result<BulkResult> {
    actor.ensure_can_verify()?;
    if receipt_ids.is_empty() || receipt_ids.len() > MAX_BULK {
        return Err(HaulbookError::BulkLimit {
            max: MAX_BULK,
            got: receipt_ids.len(),
        });
    }
    action.validate()?;

    let at = Utc::now();
    let mut items = Vec::with_capacity(receipt_ids.len());
    for id in receipt_ids {
        let outcome = match decide(conn, id, action, actor, at, true) {
            Ok(v) => {
                deliver(&v.notification);
                Ok(v.receipt.status())
            }
            Err(e) => {
                warn!("bulk verify skipped {id}: {e}");
                Err(e.to_string())
            }
        };
        items.push(BulkItem {
            receipt_id: id.clone(),
            outcome,
        });
    }
    let result = BulkResult { items };
    info!(
        "bulk verification completed: {}/{} receipts processed",
        result.succeeded(),
        receipt_ids.len()
    );
    Ok(result)
}

pub fn pending_queue(
    conn: &Connection,
    filter: &PendingFilter,
    actor: &Actor,
) -> Result<Page<Receipt>> {
    actor.ensure_can_verify()?;
    list_pending(conn, filter)
}

pub fn history(conn: &Connection, receipt_id: &str, actor: &Actor) -> Result<Vec<AuditEntry>> {
    actor.ensure_can_verify()?;
    audit_history(conn, receipt_id)
}

fn decide(
    conn: &Connection,
    receipt_id: &str,
    action: &VerifyAction,
    actor: &Actor,
    at: DateTime<Utc>,
    bulk: bool,
) -> Result<Verification> {
    action.validate()?;
    // Write lock before the read: a concurrent decision shows up as a terminal state.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let receipt = get_receipt(&tx, receipt_id)?;
    let next = receipt.state.apply(receipt_id, action, &actor.user_id, at)?;
    let status = next.status();

    let empty = VerifiedData::default();
    let verified = match action {
        VerifyAction::Approve { verified, .. } => verified,
        VerifyAction::Reject { .. } => &empty,
    };
    let amount = verified.amount.or(receipt.amount);
    let currency = verified
        .currency
        .as_deref()
        .map(|c| c.trim().to_uppercase())
        .unwrap_or_else(|| receipt.currency.clone());
    let description = verified.description.clone().or_else(|| receipt.description.clone());
    let category = verified.category.or(receipt.category);
    let receipt_date = verified.receipt_date.or(receipt.receipt_date);
    let merchant = verified.merchant.clone().or_else(|| receipt.merchant.clone());
    let reason = next.rejection_reason();
    let stamp = at.to_rfc3339();

    let metadata = match action {
        VerifyAction::Approve { verified, notes } => {
            let mut data = serde_json::to_value(verified)?;
            if let Some(obj) = data.as_object_mut() {
                obj.insert("verifiedBy".into(), json!(actor.user_id));
                obj.insert("verifiedAt".into(), json!(stamp));
            }
            merge_metadata(&receipt.metadata, [("verifiedData", data), ("notes", json!(notes))])
        }
        VerifyAction::Reject { notes, .. } => merge_metadata(
            &receipt.metadata,
            [
                ("rejectionReason", json!(reason)),
                ("rejectedBy", json!(actor.user_id)),
                ("rejectedAt", json!(stamp)),
                ("notes", json!(notes)),
            ],
        ),
    };

    let written = record_decision(
        &tx,
        receipt_id,
        &Decision {
            status,
            approved_by: &actor.user_id,
            approved_at: at,
            amount,
            currency: &currency,
            category,
            description: description.as_deref(),
            merchant: merchant.as_deref(),
            receipt_date,
            rejection_reason: reason,
            metadata: &metadata,
        },
    )?;
    if !written {
        // Another reviewer decided it between our read and write.
        return Err(match find_receipt(&tx, receipt_id)? {
            Some(current) => HaulbookError::AlreadyVerified {
                id: receipt_id.to_string(),
                status: current.status().as_str().to_lowercase(),
            },
            None => HaulbookError::ReceiptNotFound(receipt_id.to_string()),
        });
    }

    let action_name = if bulk {
        format!("RECEIPT_{status}_BULK")
    } else {
        format!("RECEIPT_{status}")
    };
    let old_values = json!({
        "status": receipt.status(),
        "amount": receipt.amount,
        "description": receipt.description,
        "category": receipt.category,
        "receiptDate": receipt.receipt_date,
    });
    let mut new_values = json!({
        "status": status,
        "amount": amount,
        "description": description,
        "category": category,
        "receiptDate": receipt_date,
        "rejectionReason": reason,
        "notes": action.notes(),
    });
    if let VerifyAction::Approve { verified, .. } = action {
        new_values["verifiedData"] = serde_json::to_value(verified)?;
    }
    if bulk {
        new_values["bulkOperation"] = json!(true);
    }
    let audit_id = append_audit(
        &tx,
        &NewAuditEntry {
            user_id: &actor.user_id,
            action: &action_name,
            entity: "Receipt",
            entity_id: receipt_id,
            old_values: &old_values,
            new_values: &new_values,
            created_at: at,
        },
    )?;

    let mut expense_id = None;
    if status == ReceiptStatus::Approved {
        if let Some(amount) = amount.filter(|a| *a > 0.0) {
            let category = category.unwrap_or(Category::Other);
            let description = description.as_deref().unwrap_or("Receipt expense");
            let id = insert_expense(
                &tx,
                &NewExpense {
                    amount,
                    currency: &currency,
                    category,
                    description,
                    expense_date: receipt_date.unwrap_or_else(|| at.date_naive()),
                    trip_id: receipt.trip_id.as_deref(),
                    vehicle_id: receipt.vehicle_id.as_deref(),
                    user_id: &receipt.uploaded_by,
                    receipt_key: Some(&receipt.storage_key),
                    approved_by: &actor.user_id,
                    approved_at: at,
                    source_receipt_id: receipt_id,
                },
            )?;
            let expense_values = json!({
                "amount": amount,
                "category": category,
                "description": description,
                "sourceReceiptId": receipt_id,
            });
            append_audit(
                &tx,
                &NewAuditEntry {
                    user_id: &actor.user_id,
                    action: "EXPENSE_CREATED_FROM_RECEIPT",
                    entity: "Expense",
                    entity_id: &id.to_string(),
                    old_values: &Value::Null,
                    new_values: &expense_values,
                    created_at: at,
                },
            )?;
            expense_id = Some(id);
        }
    }

    let updated = get_receipt(&tx, receipt_id)?;
    tx.commit()?;
    info!(
        "receipt {receipt_id} {} by {}",
        status.as_str().to_lowercase(),
        actor.user_id
    );

    let notification = notification_for(&updated);
    Ok(Verification {
        receipt: updated,
        audit_id,
        expense_id,
        notification,
    })
}

/// Existing metadata keys survive, including the OCR parse; the given
/// entries are added or replaced.
fn merge_metadata<const N: usize>(base: &Value, entries: [(&str, Value); N]) -> Value {
    let mut map = base.as_object().cloned().unwrap_or_else(Map::new);
    for (key, value) in entries {
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}

pub fn notification_for(receipt: &Receipt) -> Notification {
    let status = receipt.status();
    let amount = money(receipt.amount.unwrap_or(0.0));
    let message = match receipt.state.rejection_reason() {
        Some(reason) => format!("Your receipt for {amount} was rejected. Reason: {reason}"),
        None => format!("Your receipt for {amount} has been approved and processed."),
    };
    Notification {
        recipient: receipt.uploaded_by.clone(),
        kind: format!("RECEIPT_{status}"),
        title: format!("Receipt {}", status.as_str().to_lowercase()),
        message,
        receipt_id: receipt.id.clone(),
    }
}

fn deliver(notification: &Notification) {
    info!(
        "notify {} [{} {}]: {}. {}",
        notification.recipient,
        notification.kind,
        notification.receipt_id,
        notification.title,
        notification.message
    );
}
