use colored::Colorize;

use crate::cli::{open_db, BulkAction, Identity};
use crate::error::Result;
use crate::fmt::amount;
use crate::models::VerifiedData;
use crate::receipts::resolve_id;
use crate::settings::load_settings;
use crate::verifier::{bulk_verify, verify, Verification};
use crate::workflow::VerifyAction;

pub fn approve(identity: &Identity, id: &str, verified: VerifiedData, notes: Option<String>) -> Result<()> {
    decide(identity, id, VerifyAction::Approve { verified, notes })
}

pub fn reject(identity: &Identity, id: &str, reason: String, notes: Option<String>) -> Result<()> {
    decide(identity, id, VerifyAction::Reject { reason, notes })
}

fn decide(identity: &Identity, id: &str, action: VerifyAction) -> Result<()> {
    let settings = load_settings();
    let actor = identity.resolve(&settings)?;
    let conn = open_db(&settings)?;
    let id = resolve_id(&conn, id)?;
    let outcome = verify(&conn, &id, &action, &actor)?;
    print_outcome(&outcome);
    Ok(())
}

pub(crate) fn print_outcome(outcome: &Verification) {
    let r = &outcome.receipt;
    let status = r.status().as_str().to_lowercase();
    let label = match r.state.rejection_reason() {
        Some(_) => format!("Receipt {} {status}", r.id).red(),
        None => format!("Receipt {} {status}", r.id).green(),
    };
    println!("{label}");
    println!("  Amount:   {}", amount(r.amount, &r.currency));
    if let Some(reason) = r.state.rejection_reason() {
        println!("  Reason:   {reason}");
    }
    println!("  Audit:    #{}", outcome.audit_id);
    if let Some(expense) = outcome.expense_id {
        println!("  Expense:  #{expense} created");
    }
    println!("  Notified: {}", outcome.notification.recipient);
}

pub fn bulk(identity: &Identity, ids: &[String], action: BulkAction, reason: Option<String>) -> Result<()> {
    let settings = load_settings();
    let actor = identity.resolve(&settings)?;
    let conn = open_db(&settings)?;

    let action = match action {
        BulkAction::Approve => VerifyAction::Approve {
            verified: VerifiedData::default(),
            notes: None,
        },
        BulkAction::Reject => VerifyAction::Reject {
            reason: reason.unwrap_or_default(),
            notes: None,
        },
    };
    let ids: Vec<String> = ids
        .iter()
        .map(|id| resolve_id(&conn, id).unwrap_or_else(|_| id.clone()))
        .collect();

    let result = bulk_verify(&conn, &ids, &action, &actor)?;
    for item in &result.items {
        match &item.outcome {
            Ok(status) => println!(
                "  {}  {}",
                item.receipt_id,
                status.as_str().to_lowercase().green()
            ),
            Err(e) => println!("  {}  {}", item.receipt_id, e.red()),
        }
    }
    println!(
        "\nBulk verification completed. {}/{} receipts processed successfully.",
        result.succeeded(),
        result.items.len()
    );
    Ok(())
}
