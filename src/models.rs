use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{HaulbookError, Result};
use crate::workflow::ReceiptState;

pub const UNKNOWN_MERCHANT: &str = "Unknown Merchant";
pub const DEFAULT_CURRENCY: &str = "USD";

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Spend category. OCR categorization only ever yields the first five and
/// `Other`; reviewers may also pick toll, parking and delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Fuel,
    Meals,
    Office,
    Maintenance,
    Lodging,
    Toll,
    Parking,
    Delivery,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Fuel,
        Category::Meals,
        Category::Office,
        Category::Maintenance,
        Category::Lodging,
        Category::Toll,
        Category::Parking,
        Category::Delivery,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fuel => "fuel",
            Self::Meals => "meals",
            Self::Office => "office",
            Self::Maintenance => "maintenance",
            Self::Lodging => "lodging",
            Self::Toll => "toll",
            Self::Parking => "parking",
            Self::Delivery => "delivery",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = HaulbookError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        if lower == "misc" {
            return Ok(Self::Other);
        }
        Self::ALL
            .iter()
            .find(|c| c.as_str() == lower)
            .copied()
            .ok_or_else(|| HaulbookError::InvalidVerifiedData(format!("unknown category '{s}'")))
    }
}

impl ToSql for Category {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Category {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// ---------------------------------------------------------------------------
// ReceiptStatus
// ---------------------------------------------------------------------------

/// Flat status column. The richer per-state data lives in [`ReceiptState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReceiptStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = HaulbookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(HaulbookError::Other(format!("unknown receipt status '{other}'"))),
        }
    }
}

impl ToSql for ReceiptStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ReceiptStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// ---------------------------------------------------------------------------
// OCR output
// ---------------------------------------------------------------------------

/// Whatever the extractor could find. Absent fields are not errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub merchant_name: Option<String>,
    pub amount: Option<f64>,
    pub date: Option<NaiveDate>,
    pub address: Option<String>,
}

/// Result of the OCR pipeline. Every field is populated; missing values
/// fall back to defaults rather than failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedReceipt {
    pub merchant_name: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub category: Category,
    pub confidence: f64,
    pub raw_text: String,
}

// ---------------------------------------------------------------------------
// Verification input
// ---------------------------------------------------------------------------

/// Reviewer-supplied values that override the OCR-derived ones on approval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
}

impl VerifiedData {
    pub fn validate(&self) -> Result<()> {
        if let Some(amount) = self.amount {
            if !amount.is_finite() || amount < 0.0 {
                return Err(HaulbookError::InvalidVerifiedData(format!(
                    "amount must be a non-negative number, got {amount}"
                )));
            }
        }
        if let Some(currency) = &self.currency {
            let code = currency.trim();
            if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(HaulbookError::InvalidVerifiedData(format!(
                    "currency must be a 3-letter code, got '{currency}'"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Acting identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = HaulbookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "driver" => Ok(Self::Driver),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            other => Err(HaulbookError::Settings(format!(
                "unknown role '{other}' (expected driver, manager or admin)"
            ))),
        }
    }
}

/// Identity supplied by the caller. Trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn ensure_can_verify(&self) -> Result<()> {
        match self.role {
            Role::Manager | Role::Admin => Ok(()),
            Role::Driver => Err(HaulbookError::AccessDenied(
                "admin or manager role required".to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Receipt {
    pub id: String,
    pub storage_key: String,
    pub original_filename: String,
    pub file_size: Option<i64>,
    pub uploaded_by: String,
    pub trip_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub state: ReceiptState,
    pub amount: Option<f64>,
    pub currency: String,
    pub category: Option<Category>,
    pub description: Option<String>,
    pub merchant: Option<String>,
    pub receipt_date: Option<NaiveDate>,
    pub metadata: serde_json::Value,
    pub uploaded_at: DateTime<Utc>,
}

impl Receipt {
    pub fn status(&self) -> ReceiptStatus {
        self.state.status()
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub user_id: String,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub old_values: serde_json::Value,
    pub new_values: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Expense {
    pub id: i64,
    pub amount: f64,
    pub currency: String,
    pub category: Category,
    pub description: String,
    pub expense_date: NaiveDate,
    pub trip_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub user_id: String,
    pub receipt_key: Option<String>,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    pub source_receipt_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!("FUEL".parse::<Category>().unwrap(), Category::Fuel);
        assert_eq!(" Lodging ".parse::<Category>().unwrap(), Category::Lodging);
        assert_eq!("MISC".parse::<Category>().unwrap(), Category::Other);
        assert!("groceries".parse::<Category>().is_err());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ReceiptStatus::Pending.is_terminal());
        assert!(!ReceiptStatus::Processing.is_terminal());
        assert!(ReceiptStatus::Approved.is_terminal());
        assert!(ReceiptStatus::Rejected.is_terminal());
        assert_eq!("approved".parse::<ReceiptStatus>().unwrap(), ReceiptStatus::Approved);
    }

    #[test]
    fn test_verified_data_rejects_negative_amount() {
        let data = VerifiedData {
            amount: Some(-1.0),
            ..Default::default()
        };
        assert!(matches!(data.validate(), Err(HaulbookError::InvalidVerifiedData(_))));
    }

    #[test]
    fn test_verified_data_rejects_bad_currency() {
        let data = VerifiedData {
            currency: Some("dollars".to_string()),
            ..Default::default()
        };
        assert!(data.validate().is_err());
        let ok = VerifiedData {
            amount: Some(0.0),
            currency: Some("CAD".to_string()),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_verified_data_json_is_camel_case() {
        let data = VerifiedData {
            amount: Some(45.67),
            receipt_date: NaiveDate::from_ymd_opt(2025, 9, 17),
            category: Some(Category::Fuel),
            ..Default::default()
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["receiptDate"], "2025-09-17");
        assert_eq!(json["category"], "fuel");
        assert!(json.get("merchant").is_none());
    }

    #[test]
    fn test_only_managers_and_admins_verify() {
        assert!(Actor::new("u1", Role::Manager).ensure_can_verify().is_ok());
        assert!(Actor::new("u1", Role::Admin).ensure_can_verify().is_ok());
        assert!(matches!(
            Actor::new("u1", Role::Driver).ensure_can_verify(),
            Err(HaulbookError::AccessDenied(_))
        ));
    }
}
