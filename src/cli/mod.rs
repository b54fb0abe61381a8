pub mod backup;
pub mod export;
pub mod history;
pub mod init;
pub mod pending;
pub mod review;
pub mod scan;
pub mod show;
pub mod status;
pub mod upload;
pub mod url;
pub mod verify;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::Connection;

use crate::db::get_connection;
use crate::error::{HaulbookError, Result};
use crate::extractor::parse_receipt_date;
use crate::models::{Actor, Category, Receipt, Role};
use crate::settings::Settings;
use crate::storage::LocalObjectStore;

#[derive(Parser)]
#[command(
    name = "haulbook",
    version,
    about = "Receipt intake and verification for small trucking fleets."
)]
pub struct Cli {
    /// Act as this user id (default: user_id from settings)
    #[arg(long = "as-user", global = true)]
    pub as_user: Option<String>,
    /// Act with this role: driver, manager or admin (default: role from settings)
    #[arg(long, global = true)]
    pub role: Option<Role>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up haulbook: choose a data directory and initialize the database.
    Init {
        /// Path for haulbook data (default: ~/Documents/haulbook)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Default acting user id
        #[arg(long)]
        user: Option<String>,
        /// Default acting role
        #[arg(long = "default-role")]
        default_role: Option<Role>,
    },
    /// Show current database and receipt counts.
    Status,
    /// Check that a file is an acceptable receipt image.
    Validate {
        /// Path to a JPG, PNG or PDF receipt
        file: String,
    },
    /// Run OCR on a file and print the parsed receipt without storing it.
    Ocr {
        /// Path to a receipt image
        file: String,
        /// Print the parsed receipt as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload a receipt image and queue it for review.
    Upload {
        /// Path to a JPG, PNG or PDF receipt
        file: String,
        /// Trip the receipt belongs to
        #[arg(long)]
        trip: Option<String>,
        /// Vehicle the receipt belongs to
        #[arg(long)]
        vehicle: Option<String>,
        /// Free-text description
        #[arg(long)]
        description: Option<String>,
        /// Store now, run OCR later with `haulbook ocr-pending`
        #[arg(long = "defer-ocr")]
        defer_ocr: bool,
    },
    /// Run OCR for every receipt still in PROCESSING.
    OcrPending,
    /// List receipts waiting for review, oldest first.
    Pending {
        #[arg(long)]
        category: Option<Category>,
        /// Uploaded on or after: YYYY-MM-DD
        #[arg(long = "from", value_parser = parse_date_arg)]
        from_date: Option<NaiveDate>,
        /// Uploaded on or before: YYYY-MM-DD
        #[arg(long = "to", value_parser = parse_date_arg)]
        to_date: Option<NaiveDate>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show one receipt.
    Show {
        /// Receipt id (or a unique prefix)
        id: String,
    },
    /// Approve a receipt, optionally correcting the OCR values.
    Approve {
        /// Receipt id (or a unique prefix)
        id: String,
        #[arg(long)]
        amount: Option<f64>,
        /// 3-letter currency code
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<Category>,
        /// Receipt date: YYYY-MM-DD or MM/DD/YYYY
        #[arg(long, value_parser = parse_date_arg)]
        date: Option<NaiveDate>,
        #[arg(long)]
        merchant: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a receipt.
    Reject {
        /// Receipt id (or a unique prefix)
        id: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Approve or reject up to 50 receipts at once.
    BulkVerify {
        /// Receipt ids
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long, value_enum)]
        action: BulkAction,
        /// Required when rejecting
        #[arg(long)]
        reason: Option<String>,
    },
    /// Interactively review pending receipts.
    Review,
    /// Show the verification history of a receipt.
    History {
        /// Receipt id (or a unique prefix)
        id: String,
    },
    /// Print a time-limited link to a receipt image.
    Url {
        /// Receipt id (or a unique prefix)
        id: String,
        /// Seconds until the link expires (default: presign_expiry_secs)
        #[arg(long)]
        expires: Option<u64>,
    },
    /// Download the image behind a link printed by `url`.
    Fetch {
        /// Link printed by `haulbook url`
        url: String,
        /// Where to write the image
        #[arg(long)]
        output: String,
    },
    /// Export approved expenses to CSV.
    Export {
        /// Expense date on or after: YYYY-MM-DD
        #[arg(long = "from", value_parser = parse_date_arg)]
        from_date: Option<NaiveDate>,
        /// Expense date on or before: YYYY-MM-DD
        #[arg(long = "to", value_parser = parse_date_arg)]
        to_date: Option<NaiveDate>,
        /// Output CSV path
        #[arg(long)]
        output: String,
    },
    /// Back up the database and receipt images.
    Backup {
        /// Output directory (default: <data_dir>/backups/haulbook-YYYYMMDD-HHMMSS)
        #[arg(long)]
        output: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BulkAction {
    Approve,
    Reject,
}

/// Acting identity overrides from the global flags.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub as_user: Option<String>,
    pub role: Option<Role>,
}

impl Identity {
    pub fn resolve(&self, settings: &Settings) -> Result<Actor> {
        let user_id = self
            .as_user
            .clone()
            .unwrap_or_else(|| settings.user_id.clone());
        if user_id.trim().is_empty() {
            return Err(HaulbookError::Settings(
                "no acting user: pass --as-user or run `haulbook init --user <id>`".to_string(),
            ));
        }
        let role = match self.role {
            Some(role) => role,
            None => settings.default_role()?,
        };
        Ok(Actor::new(user_id.trim(), role))
    }
}

pub(crate) fn parse_date_arg(raw: &str) -> std::result::Result<NaiveDate, String> {
    parse_receipt_date(raw.trim()).ok_or_else(|| format!("invalid date '{raw}' (use YYYY-MM-DD)"))
}

pub(crate) fn open_db(settings: &Settings) -> Result<Connection> {
    let db_path = settings.db_path();
    if !db_path.exists() {
        return Err(HaulbookError::Settings(
            "Database not found. Run `haulbook init` to set up.".to_string(),
        ));
    }
    get_connection(&db_path)
}

pub(crate) fn object_store(settings: &Settings) -> Result<LocalObjectStore> {
    if settings.signing_secret.is_empty() {
        return Err(HaulbookError::Settings(
            "signing secret missing. Run `haulbook init` to set up.".to_string(),
        ));
    }
    Ok(LocalObjectStore::new(
        settings.objects_dir(),
        settings.signing_secret.clone(),
    ))
}

/// Drivers only see their own uploads.
pub(crate) fn ensure_can_view(actor: &Actor, receipt: &Receipt) -> Result<()> {
    if actor.role == Role::Driver && actor.user_id != receipt.uploaded_by {
        return Err(HaulbookError::AccessDenied(format!(
            "receipt {} belongs to another driver",
            receipt.id
        )));
    }
    Ok(())
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_prefers_flags() {
        let settings = Settings {
            user_id: "dispatch".to_string(),
            role: "manager".to_string(),
            ..Settings::default()
        };
        let actor = Identity::default().resolve(&settings).unwrap();
        assert_eq!(actor, Actor::new("dispatch", Role::Manager));

        let flags = Identity {
            as_user: Some("drv-4".to_string()),
            role: Some(Role::Driver),
        };
        assert_eq!(flags.resolve(&settings).unwrap(), Actor::new("drv-4", Role::Driver));
    }

    #[test]
    fn test_identity_requires_a_user() {
        assert!(Identity::default().resolve(&Settings::default()).is_err());
    }

    #[test]
    fn test_parse_date_arg() {
        assert_eq!(
            parse_date_arg("2025-09-17").unwrap(),
            NaiveDate::from_ymd_opt(2025, 9, 17).unwrap()
        );
        assert!(parse_date_arg("09/17/2025").is_ok());
        assert!(parse_date_arg("yesterday").is_err());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0f3a9c2e-1111-2222"), "0f3a9c2e");
        assert_eq!(short_id("abc"), "abc");
    }
}
