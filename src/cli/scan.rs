use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::fmt::{format_bytes, money};
use crate::ocr::{recognizer_from_settings, validate_receipt_image, OcrPipeline};
use crate::settings::load_settings;

fn read_image(file: &str) -> Result<(Vec<u8>, String)> {
    let bytes = std::fs::read(file)?;
    let filename = Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string());
    Ok((bytes, filename))
}

pub fn validate(file: &str) -> Result<()> {
    let (bytes, filename) = read_image(file)?;
    validate_receipt_image(&bytes, &filename)?;
    println!(
        "{} {filename} is a valid receipt image ({})",
        "ok".green(),
        format_bytes(bytes.len() as u64)
    );
    Ok(())
}

pub fn ocr(file: &str, json: bool) -> Result<()> {
    let settings = load_settings();
    let (bytes, filename) = read_image(file)?;
    let pipeline = OcrPipeline::new(recognizer_from_settings(&settings)?);
    let parsed = settings
        .retry_policy()
        .run(&format!("ocr {filename}"), |_| pipeline.parse_receipt(&bytes, &filename))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![Cell::new("Merchant"), Cell::new(&parsed.merchant_name)]);
    table.add_row(vec![Cell::new("Amount"), Cell::new(money(parsed.amount))]);
    table.add_row(vec![Cell::new("Date"), Cell::new(parsed.date)]);
    table.add_row(vec![Cell::new("Category"), Cell::new(parsed.category)]);
    table.add_row(vec![
        Cell::new("Confidence"),
        Cell::new(format!("{:.0}%", parsed.confidence * 100.0)),
    ]);
    println!("{} ({})\n{table}", filename.bold(), pipeline.recognizer_name());
    println!("\n{}", parsed.raw_text.dimmed());
    Ok(())
}
