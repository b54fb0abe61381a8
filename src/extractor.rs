use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ExtractedFields;

// Optional keyword, optional currency symbol, then a number. Bare integers
// (date parts, card digits, street numbers) are not treated as amounts.
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(total|amount|sum)?\s*:?\s*(\$)?\s*(\d+)(\.\d+)?").expect("amount pattern")
});

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}/\d{1,2}/\d{4}|\d{4}-\d{2}-\d{2}").expect("date pattern"));

static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b\d+[ \t]+(?:[a-z0-9.'-]+[ \t]+)*?(?:street|st|avenue|ave|road|rd|boulevard|blvd)\b\.?",
    )
    .expect("address pattern")
});

pub fn extract_fields(text: &str) -> ExtractedFields {
    ExtractedFields {
        merchant_name: extract_merchant(text),
        amount: extract_amount(text),
        date: extract_date(text),
        address: extract_address(text),
    }
}

/// First non-blank line.
pub fn extract_merchant(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Last amount-like token in the text; grand totals follow the line items.
pub fn extract_amount(text: &str) -> Option<f64> {
    AMOUNT_RE
        .captures_iter(text)
        .filter(|caps| caps.get(1).is_some() || caps.get(2).is_some() || caps.get(4).is_some())
        .filter_map(|caps| {
            let whole = &caps[3];
            let frac = caps.get(4).map_or("", |m| m.as_str());
            format!("{whole}{frac}").parse::<f64>().ok()
        })
        .last()
}

/// First `MM/DD/YYYY` or `YYYY-MM-DD` token. An impossible first date
/// (e.g. 13/45/2025) yields nothing rather than falling through to a later one.
pub fn extract_date(text: &str) -> Option<NaiveDate> {
    let raw = DATE_RE.find(text)?.as_str();
    parse_receipt_date(raw)
}

pub fn parse_receipt_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let format = if raw.contains('/') { "%m/%d/%Y" } else { "%Y-%m-%d" };
    NaiveDate::parse_from_str(raw, format).ok()
}

pub fn extract_address(text: &str) -> Option<String> {
    ADDRESS_RE.find(text).map(|m| m.as_str().trim().to_string())
}
