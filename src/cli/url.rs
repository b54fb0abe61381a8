use std::time::Duration;

use chrono::Utc;

use crate::cli::{ensure_can_view, object_store, open_db, Identity};
use crate::error::Result;
use crate::receipts::{get_receipt, resolve_id};
use crate::settings::load_settings;
use crate::storage::ObjectStore;

pub fn run(identity: &Identity, id: &str, expires: Option<u64>) -> Result<()> {
    let settings = load_settings();
    let actor = identity.resolve(&settings)?;
    let conn = open_db(&settings)?;
    let store = object_store(&settings)?;
    let receipt = get_receipt(&conn, &resolve_id(&conn, id)?)?;
    ensure_can_view(&actor, &receipt)?;

    let expires_in = expires
        .map(Duration::from_secs)
        .unwrap_or_else(|| settings.presign_expiry());
    let signed = store.presigned_url(&receipt.storage_key, expires_in)?;
    println!("{}", signed.url);
    println!("Expires {}", signed.expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}

/// Follow a link printed by `url`: check its signature and expiry, then copy
/// the image it points at.
pub fn fetch(url: &str, output: &str) -> Result<()> {
    let settings = load_settings();
    let store = object_store(&settings)?;
    let key = store.verify_url(url, Utc::now())?;
    let bytes = store.get(&key)?;
    std::fs::write(output, &bytes)?;
    println!("Saved {key} to {output}");
    Ok(())
}
