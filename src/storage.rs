use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{HaulbookError, Result};
use crate::ocr::{file_extension, VALID_EXTENSIONS};

type HmacSha256 = Hmac<Sha256>;

static KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^receipts/\d{4}-\d{2}-\d{2}/(trip|user)-\w+/\w+\.(jpg|jpeg|png|pdf)$")
        .expect("storage key pattern")
});

/// Where uploaded receipt images live, and how they are shared.
pub trait ObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Vec<u8>>;
    fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<PresignedUrl>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum KeyOwner<'a> {
    Trip(&'a str),
    User(&'a str),
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// `receipts/{date}/{trip-<id>|user-<id>}/{object id}.{ext}`
pub fn receipt_key(
    owner: KeyOwner<'_>,
    filename: &str,
    date: NaiveDate,
    object_id: Uuid,
) -> Result<String> {
    let ext = file_extension(filename)
        .filter(|ext| VALID_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| HaulbookError::InvalidFormat(filename.to_string()))?;
    let owner = match owner {
        KeyOwner::Trip(id) => format!("trip-{}", sanitize_segment(id)),
        KeyOwner::User(id) => format!("user-{}", sanitize_segment(id)),
    };
    let key = format!(
        "receipts/{}/{}/{}.{}",
        date.format("%Y-%m-%d"),
        owner,
        object_id.simple(),
        ext
    );
    validate_key(&key)?;
    Ok(key)
}

pub fn validate_key(key: &str) -> Result<()> {
    if KEY_RE.is_match(key) {
        Ok(())
    } else {
        Err(HaulbookError::InvalidStorageKey(key.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Local filesystem store
// ---------------------------------------------------------------------------

/// Stores objects under a root directory and hands out `file://` URLs
/// signed with a shared secret.
pub struct LocalObjectStore {
    root: PathBuf,
    secret: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            secret: secret.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn mac(&self, key: &str, expires_at: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| HaulbookError::Storage(format!("signing key rejected: {e}")))?;
        mac.update(format!("{key}\n{expires_at}").as_bytes());
        Ok(mac)
    }

    fn sign(&self, key: &str, expires_at: i64) -> Result<String> {
        Ok(hex::encode(self.mac(key, expires_at)?.finalize().into_bytes()))
    }

    fn url_prefix(&self) -> String {
        format!("file://{}/", self.root.display())
    }

    pub fn presigned_url_at(
        &self,
        key: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<PresignedUrl> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Err(HaulbookError::Storage(format!("object not found: {key}")));
        }
        let out_of_range = || HaulbookError::Storage("expiry out of range".to_string());
        let secs = i64::try_from(expires_in.as_secs()).map_err(|_| out_of_range())?;
        let expires_at = chrono::Duration::try_seconds(secs)
            .and_then(|delta| now.checked_add_signed(delta))
            .ok_or_else(out_of_range)?;
        let ts = expires_at.timestamp();
        let signature = self.sign(key, ts)?;
        Ok(PresignedUrl {
            url: format!(
                "{}{}?expires={}&signature={}",
                self.url_prefix(),
                key,
                ts,
                signature
            ),
            expires_at,
        })
    }

    /// Check a URL produced by [`presigned_url`](ObjectStore::presigned_url)
    /// and return the object key it grants access to.
    pub fn verify_url(&self, url: &str, now: DateTime<Utc>) -> Result<String> {
        let invalid = || HaulbookError::Storage("invalid presigned URL".to_string());
        let rest = url.strip_prefix(&self.url_prefix()).ok_or_else(invalid)?;
        let (key, query) = rest.split_once('?').ok_or_else(invalid)?;

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = Some(v),
                _ => {}
            }
        }
        let (expires, signature) = expires.zip(signature).ok_or_else(invalid)?;

        let mismatch = || HaulbookError::Storage("presigned URL signature mismatch".to_string());
        let signature = hex::decode(signature).map_err(|_| mismatch())?;
        self.mac(key, expires)?
            .verify_slice(&signature)
            .map_err(|_| mismatch())?;
        if now.timestamp() > expires {
            return Err(HaulbookError::Storage("presigned URL has expired".to_string()));
        }
        Ok(key.to_string())
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        debug!("stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                HaulbookError::Storage(format!("object not found: {key}"))
            }
            _ => HaulbookError::Io(e),
        })
    }

    fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<PresignedUrl> {
        self.presigned_url_at(key, expires_in, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 17).unwrap()
    }

    fn store() -> (tempfile::TempDir, LocalObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("objects"), "s3cret");
        (dir, store)
    }

    #[test]
    fn test_receipt_key_layout() {
        let id = Uuid::new_v4();
        let key = receipt_key(KeyOwner::User("driver-7"), "Scan.JPG", date(), id).unwrap();
        assert_eq!(key, format!("receipts/2025-09-17/user-driver_7/{}.jpg", id.simple()));
        let trip = receipt_key(KeyOwner::Trip("T100"), "r.pdf", date(), id).unwrap();
        assert!(trip.starts_with("receipts/2025-09-17/trip-T100/"));
    }

    #[test]
    fn test_receipt_key_rejects_bad_extension() {
        let err = receipt_key(KeyOwner::User("u1"), "notes.txt", date(), Uuid::new_v4());
        assert!(matches!(err, Err(HaulbookError::InvalidFormat(_))));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("receipts/2025-09-17/trip-abc/0f3a.png").is_ok());
        assert!(validate_key("receipts/2025-09-17/user-abc/../../etc.png").is_err());
        assert!(validate_key("receipts/2025-09-17/team-abc/x.png").is_err());
        assert!(validate_key("receipts/2025-09-17/user-abc/x.webp").is_err());
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        let key = "receipts/2025-09-17/user-u1/abc.jpg";
        store.put(key, b"image-bytes").unwrap();
        assert_eq!(store.get(key).unwrap(), b"image-bytes");
    }

    #[test]
    fn test_get_missing_object() {
        let (_dir, store) = store();
        let err = store.get("receipts/2025-09-17/user-u1/none.jpg").unwrap_err();
        assert!(err.to_string().contains("object not found"));
    }

    #[test]
    fn test_presigned_url_verifies_until_expiry() {
        let (_dir, store) = store();
        let key = "receipts/2025-09-17/user-u1/abc.jpg";
        store.put(key, b"x").unwrap();
        let now = Utc::now();
        let signed = store.presigned_url_at(key, Duration::from_secs(60), now).unwrap();
        assert_eq!(store.verify_url(&signed.url, now).unwrap(), key);
        let later = now + chrono::Duration::seconds(61);
        assert!(store.verify_url(&signed.url, later).is_err());
    }

    #[test]
    fn test_tampered_url_is_rejected() {
        let (dir, store) = store();
        let key = "receipts/2025-09-17/user-u1/abc.jpg";
        store.put(key, b"x").unwrap();
        let now = Utc::now();
        let signed = store.presigned_url_at(key, Duration::from_secs(60), now).unwrap();
        let tampered = signed.url.replace("abc.jpg", "abd.jpg");
        assert!(store.verify_url(&tampered, now).is_err());

        let other = LocalObjectStore::new(dir.path().join("objects"), "different");
        assert!(other.verify_url(&signed.url, now).is_err());
    }

    #[test]
    fn test_presign_rejects_expiry_out_of_range() {
        let (_dir, store) = store();
        let key = "receipts/2025-09-17/user-u1/abc.jpg";
        store.put(key, b"x").unwrap();
        let err = store
            .presigned_url_at(key, Duration::from_secs(i64::MAX as u64), Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("expiry out of range"));
        let err = store
            .presigned_url_at(key, Duration::from_secs(u64::MAX), Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("expiry out of range"));
    }

    #[test]
    fn test_signature_is_keyed_hmac() {
        let (_dir, store) = store();
        let key = "receipts/2025-09-17/user-u1/abc.jpg";
        store.put(key, b"x").unwrap();
        let now = Utc::now();
        let signed = store.presigned_url_at(key, Duration::from_secs(60), now).unwrap();
        let ts = signed.expires_at.timestamp();

        let mut mac = HmacSha256::new_from_slice(b"s3cret").unwrap();
        mac.update(format!("{key}\n{ts}").as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        assert!(signed.url.ends_with(&format!("signature={expected}")));

        let not_hex = signed.url.replace(&expected, "zz");
        assert!(store.verify_url(&not_hex, now).unwrap_err().to_string().contains("mismatch"));
    }

    #[test]
    fn test_presign_missing_object_fails() {
        let (_dir, store) = store();
        let err = store.presigned_url("receipts/2025-09-17/user-u1/abc.jpg", Duration::from_secs(5));
        assert!(matches!(err, Err(HaulbookError::Storage(_))));
    }
}
