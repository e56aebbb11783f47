//! Calculator Vault - Hidden File Registry
//!
//! Metadata for hidden files, keyed by the absolute path the file currently
//! has on disk. Backed by SQLite; every call is atomic.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{VaultError, VaultResult};
use crate::file_type::FileType;
use crate::secure_fs::file_name_of;

/// Metadata of one hidden file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenFileRecord {
    /// Absolute path of the file as it exists on disk (primary key)
    pub file_path: PathBuf,
    /// Original display name, with original extension
    pub file_name: String,
    /// Name used while the file is in its encrypted form
    pub encrypted_file_name: String,
    /// Classification captured at hide time
    pub file_type: FileType,
    /// Extension to restore on decryption, e.g. ".jpg"
    pub original_extension: String,
    /// True iff the bytes at `file_path` are ciphertext
    pub is_encrypted: bool,
    /// Set once at creation
    pub date_added: DateTime<Utc>,
}

impl HiddenFileRecord {
    pub fn new(
        file_path: PathBuf,
        file_name: impl Into<String>,
        encrypted_file_name: impl Into<String>,
        file_type: FileType,
        original_extension: impl Into<String>,
        is_encrypted: bool,
    ) -> Self {
        Self {
            file_path,
            file_name: file_name.into(),
            encrypted_file_name: encrypted_file_name.into(),
            file_type,
            original_extension: original_extension.into(),
            is_encrypted,
            date_added: Utc::now(),
        }
    }

    /// A new record for a duplicate of this file at `file_path`
    pub fn duplicate_at(&self, file_path: PathBuf) -> Self {
        Self {
            file_path,
            date_added: Utc::now(),
            ..self.clone()
        }
    }

    /// This record once its bytes live at `stored`. An encrypted file keeps
    /// its encrypted name in step with the name on disk.
    pub fn stored_as(mut self, stored: &Path) -> VaultResult<Self> {
        if self.is_encrypted {
            self.encrypted_file_name = file_name_of(stored)?;
        }
        Ok(self)
    }
}

/// Persistence contract for [`HiddenFileRecord`]s
pub trait HiddenFileRegistry: Send + Sync {
    fn get_by_path(&self, path: &Path) -> VaultResult<Option<HiddenFileRecord>>;

    fn get_by_original_name(&self, file_name: &str) -> VaultResult<Option<HiddenFileRecord>>;

    /// Upsert: replaces any record with the same path
    fn insert(&self, record: &HiddenFileRecord) -> VaultResult<()>;

    /// Update the record with the same path; no-op when absent
    fn update(&self, record: &HiddenFileRecord) -> VaultResult<()>;

    fn delete(&self, record: &HiddenFileRecord) -> VaultResult<()>;

    /// Move the record at `old_path` to `new_path` with a new encryption state.
    /// Returns false when no record exists at `old_path`.
    fn update_encryption_status(
        &self,
        old_path: &Path,
        new_path: &Path,
        encrypted_file_name: &str,
        is_encrypted: bool,
    ) -> VaultResult<bool>;

    /// Replace the record at `old_path` by `record` in one step
    fn rekey(&self, old_path: &Path, record: &HiddenFileRecord) -> VaultResult<()>;

    fn list_all(&self) -> VaultResult<Vec<HiddenFileRecord>>;

    fn count(&self) -> VaultResult<usize>;

    /// Live view of all records, refreshed after every mutation
    fn subscribe(&self) -> watch::Receiver<Vec<HiddenFileRecord>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS hidden_files (
        file_path TEXT PRIMARY KEY NOT NULL,
        file_name TEXT NOT NULL,
        encrypted_file_name TEXT NOT NULL,
        file_type TEXT NOT NULL,
        original_extension TEXT NOT NULL,
        is_encrypted INTEGER NOT NULL,
        date_added TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_hidden_files_name ON hidden_files(file_name);
"#;

const COLUMNS: &str = "file_path, file_name, encrypted_file_name, file_type, \
                       original_extension, is_encrypted, date_added";

/// SQLite-backed registry
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
    live: watch::Sender<Vec<HiddenFileRecord>>,
}

impl SqliteRegistry {
    /// Open (or create) the registry database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Registry that lives only as long as this value
    pub fn open_in_memory() -> VaultResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> VaultResult<Self> {
        conn.execute_batch(SCHEMA)?;
        let all = query_all(&conn)?;
        let (live, _) = watch::channel(all);

        Ok(Self {
            conn: Mutex::new(conn),
            live,
        })
    }

    fn publish(&self, conn: &Connection) {
        match query_all(conn) {
            Ok(all) => {
                self.live.send_replace(all);
            }
            Err(e) => warn!("Could not refresh live registry listing: {}", e),
        }
    }
}

impl HiddenFileRegistry for SqliteRegistry {
    fn get_by_path(&self, path: &Path) -> VaultResult<Option<HiddenFileRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {} FROM hidden_files WHERE file_path = ?1", COLUMNS),
                params![path_key(path)?],
                read_record,
            )
            .optional()?;
        Ok(record)
    }

    fn get_by_original_name(&self, file_name: &str) -> VaultResult<Option<HiddenFileRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM hidden_files WHERE file_name = ?1 LIMIT 1",
                    COLUMNS
                ),
                params![file_name],
                read_record,
            )
            .optional()?;
        Ok(record)
    }

    fn insert(&self, record: &HiddenFileRecord) -> VaultResult<()> {
        let conn = self.conn.lock();
        insert_record(&conn, record)?;
        self.publish(&conn);
        Ok(())
    }

    fn update(&self, record: &HiddenFileRecord) -> VaultResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE hidden_files SET file_name = ?2, encrypted_file_name = ?3, file_type = ?4, \
             original_extension = ?5, is_encrypted = ?6, date_added = ?7 WHERE file_path = ?1",
            params![
                path_key(&record.file_path)?,
                record.file_name,
                record.encrypted_file_name,
                record.file_type.as_str(),
                record.original_extension,
                record.is_encrypted,
                record.date_added.to_rfc3339(),
            ],
        )?;
        if changed > 0 {
            self.publish(&conn);
        }
        Ok(())
    }

    fn delete(&self, record: &HiddenFileRecord) -> VaultResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM hidden_files WHERE file_path = ?1",
            params![path_key(&record.file_path)?],
        )?;
        if changed > 0 {
            self.publish(&conn);
        }
        Ok(())
    }

    fn update_encryption_status(
        &self,
        old_path: &Path,
        new_path: &Path,
        encrypted_file_name: &str,
        is_encrypted: bool,
    ) -> VaultResult<bool> {
        let mut conn = self.conn.lock();
        let old_key = path_key(old_path)?;
        let new_key = path_key(new_path)?;

        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM hidden_files WHERE file_path = ?1)",
            params![old_key],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(false);
        }

        // A stale record at the destination would violate the primary key
        if old_key != new_key {
            tx.execute(
                "DELETE FROM hidden_files WHERE file_path = ?1",
                params![new_key],
            )?;
        }
        tx.execute(
            "UPDATE hidden_files SET is_encrypted = ?1, file_path = ?2, encrypted_file_name = ?3 \
             WHERE file_path = ?4",
            params![is_encrypted, new_key, encrypted_file_name, old_key],
        )?;
        tx.commit()?;

        self.publish(&conn);
        Ok(true)
    }

    fn rekey(&self, old_path: &Path, record: &HiddenFileRecord) -> VaultResult<()> {
        let mut conn = self.conn.lock();

        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM hidden_files WHERE file_path = ?1",
            params![path_key(old_path)?],
        )?;
        insert_record(&tx, record)?;
        tx.commit()?;

        self.publish(&conn);
        Ok(())
    }

    fn list_all(&self) -> VaultResult<Vec<HiddenFileRecord>> {
        let conn = self.conn.lock();
        query_all(&conn)
    }

    fn count(&self) -> VaultResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM hidden_files", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn subscribe(&self) -> watch::Receiver<Vec<HiddenFileRecord>> {
        self.live.subscribe()
    }
}

/// Primary key for `path`. Paths that are not valid UTF-8 are refused so two
/// different files can never share a key.
fn path_key(path: &Path) -> VaultResult<&str> {
    path.to_str()
        .ok_or_else(|| VaultError::InvalidFileName(path.display().to_string()))
}

fn insert_record(conn: &Connection, record: &HiddenFileRecord) -> VaultResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO hidden_files ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            COLUMNS
        ),
        params![
            path_key(&record.file_path)?,
            record.file_name,
            record.encrypted_file_name,
            record.file_type.as_str(),
            record.original_extension,
            record.is_encrypted,
            record.date_added.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn query_all(conn: &Connection) -> VaultResult<Vec<HiddenFileRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM hidden_files ORDER BY date_added DESC, file_path",
        COLUMNS
    ))?;
    let rows = stmt.query_map([], read_record)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<HiddenFileRecord> {
    let file_path: String = row.get(0)?;
    let file_type: String = row.get(3)?;
    let date_added: String = row.get(6)?;

    let file_type = file_type
        .parse::<FileType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    let date_added = DateTime::parse_from_rfc3339(&date_added)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            let e = VaultError::RecordCorrupted(format!("{}: {}", file_path, e));
            rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e))
        })?;

    Ok(HiddenFileRecord {
        file_path: PathBuf::from(file_path),
        file_name: row.get(1)?,
        encrypted_file_name: row.get(2)?,
        file_type,
        original_extension: row.get(4)?,
        is_encrypted: row.get(5)?,
        date_added,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(path: &str, encrypted: bool) -> HiddenFileRecord {
        HiddenFileRecord::new(
            PathBuf::from(path),
            "photo.jpg",
            "photo.enc",
            FileType::Image,
            ".jpg",
            encrypted,
        )
    }

    #[test]
    fn test_insert_and_lookup() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        let rec = record("/vault/images/photo.enc", true);

        reg.insert(&rec).unwrap();
        let got = reg.get_by_path(Path::new("/vault/images/photo.enc")).unwrap().unwrap();
        assert_eq!(got, rec);
        assert!(reg.get_by_path(Path::new("/vault/images/other.enc")).unwrap().is_none());
        assert_eq!(reg.get_by_original_name("photo.jpg").unwrap().unwrap(), rec);
    }

    #[test]
    fn test_insert_replaces_on_conflict() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        reg.insert(&record("/v/a.enc", true)).unwrap();

        let mut replacement = record("/v/a.enc", false);
        replacement.file_name = "renamed.jpg".into();
        reg.insert(&replacement).unwrap();

        assert_eq!(reg.count().unwrap(), 1);
        assert_eq!(reg.get_by_path(Path::new("/v/a.enc")).unwrap().unwrap(), replacement);
    }

    #[test]
    fn test_update_and_delete() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        let mut rec = record("/v/a.jpg", false);
        reg.insert(&rec).unwrap();

        rec.file_name = "beach.jpg".into();
        reg.update(&rec).unwrap();
        assert_eq!(
            reg.get_by_path(&rec.file_path).unwrap().unwrap().file_name,
            "beach.jpg"
        );

        // Updating an absent record is a no-op
        reg.update(&record("/v/missing.jpg", false)).unwrap();
        assert_eq!(reg.count().unwrap(), 1);

        reg.delete(&rec).unwrap();
        assert_eq!(reg.count().unwrap(), 0);
    }

    #[test]
    fn test_update_encryption_status_rekeys() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        let rec = record("/v/photo.jpg", false);
        reg.insert(&rec).unwrap();

        let moved = reg
            .update_encryption_status(
                Path::new("/v/photo.jpg"),
                Path::new("/v/photo.enc"),
                "photo.enc",
                true,
            )
            .unwrap();
        assert!(moved);

        assert!(reg.get_by_path(Path::new("/v/photo.jpg")).unwrap().is_none());
        let got = reg.get_by_path(Path::new("/v/photo.enc")).unwrap().unwrap();
        assert!(got.is_encrypted);
        assert_eq!(got.file_type, FileType::Image);
        assert_eq!(got.date_added, rec.date_added);
    }

    #[test]
    fn test_update_encryption_status_replaces_stale_destination() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        reg.insert(&record("/v/photo.enc", true)).unwrap();
        reg.insert(&record("/v/photo.jpg", false)).unwrap();

        assert!(reg
            .update_encryption_status(
                Path::new("/v/photo.enc"),
                Path::new("/v/photo.jpg"),
                "photo.enc",
                false,
            )
            .unwrap());
        assert_eq!(reg.count().unwrap(), 1);
    }

    #[test]
    fn test_update_encryption_status_without_source_keeps_destination() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        reg.insert(&record("/v/b.enc", true)).unwrap();

        let moved = reg
            .update_encryption_status(Path::new("/v/a.enc"), Path::new("/v/b.enc"), "b.enc", true)
            .unwrap();
        assert!(!moved);
        assert!(reg.get_by_path(Path::new("/v/b.enc")).unwrap().is_some());
    }

    #[test]
    fn test_rekey() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        let rec = record("/v/old/a.enc", true);
        reg.insert(&rec).unwrap();

        let moved = rec.duplicate_at(PathBuf::from("/v/new/a.enc"));
        reg.rekey(&rec.file_path, &moved).unwrap();

        assert!(reg.get_by_path(&rec.file_path).unwrap().is_none());
        assert!(reg.get_by_path(&moved.file_path).unwrap().is_some());
    }

    #[test]
    fn test_live_listing_follows_mutations() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        let mut live = reg.subscribe();
        assert!(live.borrow_and_update().is_empty());

        reg.insert(&record("/v/a.enc", true)).unwrap();
        assert!(live.has_changed().unwrap());
        assert_eq!(live.borrow_and_update().len(), 1);

        reg.delete(&record("/v/a.enc", true)).unwrap();
        assert!(live.borrow_and_update().is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db").join("hidden_files.db");

        {
            let reg = SqliteRegistry::open(&db).unwrap();
            reg.insert(&record("/v/a.enc", true)).unwrap();
        }

        let reg = SqliteRegistry::open(&db).unwrap();
        assert_eq!(reg.count().unwrap(), 1);
        assert_eq!(reg.subscribe().borrow().len(), 1);
    }

    #[test]
    fn test_stored_as_follows_encrypted_name() {
        let encrypted = record("/v/a.enc", true).stored_as(Path::new("/w/a_1.enc")).unwrap();
        assert_eq!(encrypted.encrypted_file_name, "a_1.enc");

        let plain = record("/v/a.jpg", false).stored_as(Path::new("/w/a_1.jpg")).unwrap();
        assert_eq!(plain.encrypted_file_name, "photo.enc");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let reg = SqliteRegistry::open_in_memory().unwrap();
        let first = PathBuf::from(OsStr::from_bytes(b"/v/\xff.jpg"));
        let second = PathBuf::from(OsStr::from_bytes(b"/v/\xfe.jpg"));

        let mut rec = record("/v/x.jpg", false);
        rec.file_path = first.clone();
        assert!(matches!(reg.insert(&rec), Err(VaultError::InvalidFileName(_))));
        assert!(matches!(reg.get_by_path(&second), Err(VaultError::InvalidFileName(_))));
        assert!(reg
            .update_encryption_status(&first, Path::new("/v/x.enc"), "x.enc", true)
            .is_err());
        assert_eq!(reg.count().unwrap(), 0);
    }
}
