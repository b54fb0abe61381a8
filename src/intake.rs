use chrono::Utc;
use log::{info, warn};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{HaulbookError, Result};
use crate::models::{Receipt, ReceiptStatus};
use crate::ocr::{validate_receipt_image, OcrPipeline, TextRecognizer};
use crate::receipts::{attach_ocr, get_receipt, insert_receipt, list_by_status, NewReceipt};
use crate::retry::RetryPolicy;
use crate::storage::{receipt_key, validate_key, KeyOwner, ObjectStore};

pub struct Upload<'a> {
    pub bytes: &'a [u8],
    pub filename: &'a str,
    pub uploaded_by: &'a str,
    pub trip_id: Option<&'a str>,
    pub vehicle_id: Option<&'a str>,
    pub description: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    /// Recognize during the upload; the receipt lands in `PENDING`.
    Inline,
    /// Leave the receipt in `PROCESSING` until [`Intake::resolve_ocr`] runs.
    Deferred,
}

/// Everything an upload touches: the database, the object store and the
/// OCR pipeline with its retry policy.
pub struct Intake<'a, S: ?Sized, R> {
    pub conn: &'a Connection,
    pub store: &'a S,
    pub pipeline: &'a OcrPipeline<R>,
    pub retry: RetryPolicy,
}

impl<'a, S, R> Intake<'a, S, R>
where
    S: ObjectStore + ?Sized,
    R: TextRecognizer,
{
    pub fn ingest(&self, upload: &Upload<'_>, mode: OcrMode) -> Result<Receipt> {
        validate_receipt_image(upload.bytes, upload.filename)?;

        let id = Uuid::new_v4();
        let owner = match upload.trip_id {
            Some(trip) => KeyOwner::Trip(trip),
            None => KeyOwner::User(upload.uploaded_by),
        };
        let now = Utc::now();
        let key = receipt_key(owner, upload.filename, now.date_naive(), id)?;
        self.store.put(&key, upload.bytes)?;

        let receipt_id = id.to_string();
        let metadata = json!({
            "originalFilename": upload.filename,
            "fileSize": upload.bytes.len(),
        });
        insert_receipt(
            self.conn,
            &NewReceipt {
                id: &receipt_id,
                storage_key: &key,
                original_filename: upload.filename,
                file_size: Some(upload.bytes.len() as i64),
                uploaded_by: upload.uploaded_by,
                trip_id: upload.trip_id,
                vehicle_id: upload.vehicle_id,
                status: ReceiptStatus::Processing,
                description: upload.description,
                metadata: &metadata,
                uploaded_at: now,
            },
        )?;
        info!(
            "uploaded {} ({} bytes) as receipt {receipt_id} at {key}",
            upload.filename,
            upload.bytes.len()
        );

        match mode {
            OcrMode::Inline => self.resolve_ocr(&receipt_id),
            OcrMode::Deferred => get_receipt(self.conn, &receipt_id),
        }
    }

    /// Run OCR for a `PROCESSING` receipt and move it to `PENDING`. A
    /// recognition failure that survives the retries is recorded under
    /// `ocrError` and the receipt still joins the review queue.
    pub fn resolve_ocr(&self, receipt_id: &str) -> Result<Receipt> {
        let receipt = get_receipt(self.conn, receipt_id)?;
        receipt.state.resolve_ocr()?;
        validate_key(&receipt.storage_key)?;
        let image = self.store.get(&receipt.storage_key)?;

        let outcome = self.retry.run(&format!("ocr {receipt_id}"), |_| {
            self.pipeline
                .parse_receipt(&image, &receipt.original_filename)
        });

        let mut metadata = receipt.metadata.as_object().cloned().unwrap_or_else(Map::new);
        metadata.insert(
            "ocrProvider".into(),
            json!(self.pipeline.recognizer_name()),
        );
        let parsed = match outcome {
            Ok(parsed) => {
                metadata.insert("ocr".into(), serde_json::to_value(&parsed)?);
                Some(parsed)
            }
            Err(e) => {
                warn!("receipt {receipt_id} needs manual entry: {e}");
                metadata.insert("ocrError".into(), json!(e.to_string()));
                None
            }
        };

        if !attach_ocr(self.conn, receipt_id, parsed.as_ref(), &Value::Object(metadata))? {
            let current = get_receipt(self.conn, receipt_id)?;
            return Err(HaulbookError::IllegalTransition {
                from: current.status().to_string(),
                to: ReceiptStatus::Pending.to_string(),
            });
        }
        info!("receipt {receipt_id} is ready for review");
        get_receipt(self.conn, receipt_id)
    }

    /// Resolve every `PROCESSING` receipt, oldest first.
    pub fn resolve_pending(&self) -> Result<Vec<(String, Result<Receipt>)>> {
        let processing = list_by_status(self.conn, ReceiptStatus::Processing)?;
        Ok(processing
            .into_iter()
            .map(|r| {
                let outcome = self.resolve_ocr(&r.id);
                (r.id, outcome)
            })
            .collect())
    }
}
