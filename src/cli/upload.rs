use std::path::Path;

use colored::Colorize;

use crate::cli::{object_store, open_db, short_id, Identity};
use crate::error::Result;
use crate::fmt::amount;
use crate::intake::{Intake, OcrMode, Upload};
use crate::models::ReceiptStatus;
use crate::ocr::{recognizer_from_settings, OcrPipeline};
use crate::settings::load_settings;

pub fn run(
    identity: &Identity,
    file: &str,
    trip: Option<&str>,
    vehicle: Option<&str>,
    description: Option<&str>,
    defer_ocr: bool,
) -> Result<()> {
    let settings = load_settings();
    let actor = identity.resolve(&settings)?;
    let conn = open_db(&settings)?;
    let store = object_store(&settings)?;
    let pipeline = OcrPipeline::new(recognizer_from_settings(&settings)?);
    let intake = Intake {
        conn: &conn,
        store: &store,
        pipeline: &pipeline,
        retry: settings.retry_policy(),
    };

    let bytes = std::fs::read(file)?;
    let filename = Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string());
    let mode = if defer_ocr { OcrMode::Deferred } else { OcrMode::Inline };

    let receipt = intake.ingest(
        &Upload {
            bytes: &bytes,
            filename: &filename,
            uploaded_by: &actor.user_id,
            trip_id: trip,
            vehicle_id: vehicle,
            description,
        },
        mode,
    )?;

    println!("Uploaded {} as receipt {}", filename, receipt.id.bold());
    println!("  Key:      {}", receipt.storage_key);
    match receipt.status() {
        ReceiptStatus::Processing => {
            println!("  Status:   {}", "PROCESSING".yellow());
            println!("Run `haulbook ocr-pending` to extract its fields.");
        }
        status => {
            println!("  Status:   {}", status.as_str().cyan());
            println!("  Merchant: {}", receipt.merchant.as_deref().unwrap_or("-"));
            println!("  Amount:   {}", amount(receipt.amount, &receipt.currency));
            if let Some(err) = receipt.metadata.get("ocrError").and_then(|e| e.as_str()) {
                println!("  {} {err}", "OCR failed, enter values on review:".red());
            }
        }
    }
    Ok(())
}

pub fn ocr_pending() -> Result<()> {
    let settings = load_settings();
    let conn = open_db(&settings)?;
    let store = object_store(&settings)?;
    let pipeline = OcrPipeline::new(recognizer_from_settings(&settings)?);
    let intake = Intake {
        conn: &conn,
        store: &store,
        pipeline: &pipeline,
        retry: settings.retry_policy(),
    };

    let results = intake.resolve_pending()?;
    if results.is_empty() {
        println!("{}", "No receipts waiting for OCR.".green());
        return Ok(());
    }

    let mut resolved = 0;
    for (id, outcome) in &results {
        match outcome {
            Ok(receipt) => {
                resolved += 1;
                let note = if receipt.metadata.get("ocrError").is_some() {
                    "needs manual entry".red().to_string()
                } else {
                    amount(receipt.amount, &receipt.currency)
                };
                println!("  {}  {}  {note}", short_id(id), receipt.merchant.as_deref().unwrap_or("-"));
            }
            Err(e) => println!("  {}  {}", short_id(id), e.to_string().red()),
        }
    }
    println!("\nResolved {resolved}/{} receipts.", results.len());
    Ok(())
}
