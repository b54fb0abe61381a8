use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const DB_FILE: &str = "haulbook.db";

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS receipts (
    id TEXT PRIMARY KEY,
    storage_key TEXT NOT NULL UNIQUE,
    original_filename TEXT NOT NULL,
    file_size INTEGER,
    uploaded_by TEXT NOT NULL,
    trip_id TEXT,
    vehicle_id TEXT,
    status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (status IN ('PENDING', 'PROCESSING', 'APPROVED', 'REJECTED')),
    amount REAL,
    currency TEXT NOT NULL DEFAULT 'USD',
    category TEXT,
    description TEXT,
    merchant TEXT,
    receipt_date TEXT,
    approved_by TEXT,
    approved_at TEXT,
    rejection_reason TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    uploaded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_receipts_status ON receipts(status, uploaded_at);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    action TEXT NOT NULL,
    entity TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    old_values TEXT,
    new_values TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity, entity_id);

CREATE TABLE IF NOT EXISTS expenses (
    id INTEGER PRIMARY KEY,
    amount REAL NOT NULL,
    currency TEXT NOT NULL,
    category TEXT NOT NULL,
    description TEXT NOT NULL,
    expense_date TEXT NOT NULL,
    trip_id TEXT,
    vehicle_id TEXT,
    user_id TEXT NOT NULL,
    receipt_key TEXT,
    approved_by TEXT NOT NULL,
    approved_at TEXT NOT NULL,
    source_receipt_id TEXT NOT NULL UNIQUE,
    FOREIGN KEY (source_receipt_id) REFERENCES receipts(id)
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = get_connection(&dir.path().join("test.db")).unwrap();
    init_db(&conn).unwrap();
    (dir, conn)
}
