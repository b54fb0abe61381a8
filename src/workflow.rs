use chrono::{DateTime, Utc};

use crate::error::{HaulbookError, Result};
use crate::models::{ReceiptStatus, VerifiedData};

/// Lifecycle of a receipt. Approval and rejection are terminal.
///
/// ```text
/// Processing --ocr resolved--> Pending
/// Pending | Processing --approve--> Approved
/// Pending | Processing --reject---> Rejected
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptState {
    Pending,
    Processing,
    Approved {
        approver: String,
        at: DateTime<Utc>,
        verified: VerifiedData,
    },
    Rejected {
        approver: String,
        at: DateTime<Utc>,
        reason: String,
    },
}

/// A reviewer decision.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyAction {
    Approve {
        verified: VerifiedData,
        notes: Option<String>,
    },
    Reject {
        reason: String,
        notes: Option<String>,
    },
}

impl VerifyAction {
    pub fn notes(&self) -> Option<&str> {
        match self {
            Self::Approve { notes, .. } | Self::Reject { notes, .. } => notes.as_deref(),
        }
    }

    /// Input checks that do not depend on the stored record.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Approve { verified, .. } => verified.validate(),
            Self::Reject { reason, .. } if reason.trim().is_empty() => {
                Err(HaulbookError::MissingRejectionReason)
            }
            Self::Reject { .. } => Ok(()),
        }
    }
}

impl ReceiptState {
    pub fn status(&self) -> ReceiptStatus {
        match self {
            Self::Pending => ReceiptStatus::Pending,
            Self::Processing => ReceiptStatus::Processing,
            Self::Approved { .. } => ReceiptStatus::Approved,
            Self::Rejected { .. } => ReceiptStatus::Rejected,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn approver(&self) -> Option<&str> {
        match self {
            Self::Approved { approver, .. } | Self::Rejected { approver, .. } => Some(approver),
            _ => None,
        }
    }

    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Approved { at, .. } | Self::Rejected { at, .. } => Some(*at),
            _ => None,
        }
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            Self::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Fails when the receipt has already been decided. The storage layer
    /// repeats this check atomically when it writes the new status.
    pub fn ensure_open(&self, receipt_id: &str) -> Result<()> {
        if self.is_terminal() {
            return Err(HaulbookError::AlreadyVerified {
                id: receipt_id.to_string(),
                status: self.status().as_str().to_lowercase(),
            });
        }
        Ok(())
    }

    /// Deferred OCR finished (successfully or not); the receipt joins the
    /// review queue.
    pub fn resolve_ocr(&self) -> Result<ReceiptState> {
        match self {
            Self::Processing => Ok(Self::Pending),
            other => Err(HaulbookError::IllegalTransition {
                from: other.status().to_string(),
                to: ReceiptStatus::Pending.to_string(),
            }),
        }
    }

    pub fn apply(
        &self,
        receipt_id: &str,
        action: &VerifyAction,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<ReceiptState> {
        action.validate()?;
        self.ensure_open(receipt_id)?;
        Ok(match action {
            VerifyAction::Approve { verified, .. } => Self::Approved {
                approver: approver.to_string(),
                at,
                verified: verified.clone(),
            },
            VerifyAction::Reject { reason, .. } => Self::Rejected {
                approver: approver.to_string(),
                at,
                reason: reason.trim().to_string(),
            },
        })
    }

    /// Rebuild the state from the flat columns a receipt row stores.
    pub fn from_columns(
        status: ReceiptStatus,
        approved_by: Option<String>,
        approved_at: Option<DateTime<Utc>>,
        rejection_reason: Option<String>,
        verified: VerifiedData,
    ) -> Result<Self> {
        let decided = |what: &str| {
            HaulbookError::Other(format!("{status} receipt is missing its {what}"))
        };
        Ok(match status {
            ReceiptStatus::Pending => Self::Pending,
            ReceiptStatus::Processing => Self::Processing,
            ReceiptStatus::Approved => Self::Approved {
                approver: approved_by.ok_or_else(|| decided("approver"))?,
                at: approved_at.ok_or_else(|| decided("approval time"))?,
                verified,
            },
            ReceiptStatus::Rejected => Self::Rejected {
                approver: approved_by.ok_or_else(|| decided("approver"))?,
                at: approved_at.ok_or_else(|| decided("rejection time"))?,
                reason: rejection_reason.ok_or_else(|| decided("rejection reason"))?,
            },
        })
    }
}
