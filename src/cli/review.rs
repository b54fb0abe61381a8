use colored::Colorize;
use dialoguer::{Input, Select};

use crate::cli::show::format_receipt;
use crate::cli::verify::print_outcome;
use crate::cli::{open_db, Identity};
use crate::error::Result;
use crate::models::{Category, VerifiedData};
use crate::receipts::PendingFilter;
use crate::settings::load_settings;
use crate::verifier::{pending_queue, verify};
use crate::workflow::VerifyAction;

const CHOICES: [&str; 4] = ["Approve", "Reject", "Skip", "Quit"];

pub fn run(identity: &Identity) -> Result<()> {
    let settings = load_settings();
    let actor = identity.resolve(&settings)?;
    let conn = open_db(&settings)?;
    let queue = pending_queue(
        &conn,
        &PendingFilter {
            limit: 200,
            ..Default::default()
        },
        &actor,
    )?;

    if queue.items.is_empty() {
        println!("{}", "No receipts waiting for review.".green());
        return Ok(());
    }
    println!("\n{} receipts to review\n", queue.total);

    let category_labels: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    let mut decided = 0;

    for receipt in &queue.items {
        println!("{}", "\u{2500}".repeat(60));
        print!("{}", format_receipt(receipt));
        println!();

        let choice = Select::new()
            .with_prompt("Decision")
            .items(&CHOICES)
            .default(0)
            .interact()
            .unwrap_or(3);

        let action = match CHOICES[choice] {
            "Approve" => {
                let amount: f64 = Input::new()
                    .with_prompt("Amount")
                    .default(receipt.amount.unwrap_or(0.0))
                    .interact_text()
                    .unwrap_or(receipt.amount.unwrap_or(0.0));
                let current = receipt.category.unwrap_or(Category::Other);
                let default_idx = Category::ALL.iter().position(|c| *c == current).unwrap_or(0);
                let cat_idx = Select::new()
                    .with_prompt("Category")
                    .items(&category_labels)
                    .default(default_idx)
                    .interact()
                    .unwrap_or(default_idx);
                let merchant: String = Input::new()
                    .with_prompt("Merchant")
                    .default(receipt.merchant.clone().unwrap_or_default())
                    .interact_text()
                    .unwrap_or_default();
                let notes: String = Input::new()
                    .with_prompt("Notes (Enter to skip)")
                    .default(String::new())
                    .interact_text()
                    .unwrap_or_default();
                VerifyAction::Approve {
                    verified: VerifiedData {
                        amount: Some(amount),
                        category: Some(Category::ALL[cat_idx]),
                        merchant: Some(merchant).filter(|m| !m.trim().is_empty()),
                        ..Default::default()
                    },
                    notes: Some(notes).filter(|n| !n.trim().is_empty()),
                }
            }
            "Reject" => {
                let reason: String = Input::new()
                    .with_prompt("Reason")
                    .interact_text()
                    .unwrap_or_default();
                VerifyAction::Reject { reason, notes: None }
            }
            "Skip" => continue,
            _ => {
                println!("{}", "Review paused.".yellow());
                break;
            }
        };

        match verify(&conn, &receipt.id, &action, &actor) {
            Ok(outcome) => {
                decided += 1;
                print_outcome(&outcome);
            }
            Err(e) => println!("{}", e.to_string().red()),
        }
    }

    println!("\n{decided} receipts decided.");
    Ok(())
}
