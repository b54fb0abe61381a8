use std::path::{Path, PathBuf};

use log::info;
use rusqlite::backup::Backup;
use rusqlite::Connection;
use walkdir::WalkDir;

use crate::cli::open_db;
use crate::db::DB_FILE;
use crate::error::Result;
use crate::fmt::format_bytes;
use crate::settings::load_settings;

#[derive(Debug, Default, PartialEq)]
pub struct Snapshot {
    pub db_bytes: u64,
    pub images: usize,
    pub image_bytes: u64,
}

pub fn run(output: Option<String>) -> Result<()> {
    let settings = load_settings();
    let conn = open_db(&settings)?;

    let dest = match output {
        Some(p) => PathBuf::from(p),
        None => {
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
            PathBuf::from(&settings.data_dir)
                .join("backups")
                .join(format!("haulbook-{stamp}"))
        }
    };

    let snapshot = snapshot(&conn, &settings.objects_dir(), &dest)?;
    println!("Backup saved to {}", dest.display());
    println!("Database: {}", format_bytes(snapshot.db_bytes));
    println!(
        "Receipt images: {} ({})",
        snapshot.images,
        format_bytes(snapshot.image_bytes)
    );
    Ok(())
}

/// Copy the live database and every stored receipt image into `dest`,
/// laid out like a data directory so it can be used as one.
pub fn snapshot(conn: &Connection, objects_dir: &Path, dest: &Path) -> Result<Snapshot> {
    std::fs::create_dir_all(dest)?;
    let db_dest = dest.join(DB_FILE);
    {
        let mut dest_conn = Connection::open(&db_dest)?;
        let backup = Backup::new(conn, &mut dest_conn)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
    }

    let mut snapshot = Snapshot {
        db_bytes: std::fs::metadata(&db_dest)?.len(),
        ..Snapshot::default()
    };
    if !objects_dir.exists() {
        return Ok(snapshot);
    }

    let objects_dest = dest.join("objects");
    for entry in WalkDir::new(objects_dir) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(objects_dir) else {
            continue;
        };
        let target = objects_dest.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        snapshot.image_bytes += std::fs::copy(entry.path(), &target)?;
        snapshot.images += 1;
    }
    info!(
        "backed up {} receipt images to {}",
        snapshot.images,
        objects_dest.display()
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::storage::{LocalObjectStore, ObjectStore};

    #[test]
    fn test_snapshot_copies_database_and_images() {
        let (dir, conn) = test_db();
        conn.execute(
            "INSERT INTO audit_log (user_id, action, entity, entity_id, created_at) \
             VALUES ('mgr-1', 'RECEIPT_APPROVED', 'Receipt', 'r1', '2025-09-17')",
            [],
        )
        .unwrap();
        let objects = dir.path().join("objects");
        let store = LocalObjectStore::new(objects.clone(), "s3cret");
        store.put("receipts/2025-09-17/user-u1/a.jpg", b"first").unwrap();
        store.put("receipts/2025-09-18/trip-T1/b.png", b"second!").unwrap();

        let dest = dir.path().join("backup");
        let snap = snapshot(&conn, &objects, &dest).unwrap();
        assert_eq!(snap.images, 2);
        assert_eq!(snap.image_bytes, 12);
        assert!(snap.db_bytes > 0);

        let copied = std::fs::read(dest.join("objects/receipts/2025-09-18/trip-T1/b.png")).unwrap();
        assert_eq!(copied, b"second!");
        let restored = Connection::open(dest.join(DB_FILE)).unwrap();
        let n: i64 = restored
            .query_row("SELECT count(*) FROM audit_log", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_snapshot_without_images() {
        let (dir, conn) = test_db();
        let dest = dir.path().join("backup");
        let snap = snapshot(&conn, &dir.path().join("objects"), &dest).unwrap();
        assert_eq!(snap.images, 0);
        assert!(dest.join(DB_FILE).exists());
        assert!(!dest.join("objects").exists());
    }
}
