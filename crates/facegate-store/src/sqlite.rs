//! SQLite-backed credential store.
//!
//! Layout: a single `faces` table. Templates are stored as little-endian f64
//! blobs together with the encoding version they were written with.

use crate::{CredentialRecord, CredentialStore, RecordSummary, StoreError};
use chrono::{SecondsFormat, Utc};
use facegate_core::{FaceTemplate, TemplateError, TEMPLATE_VERSION};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS faces (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        name             TEXT    NOT NULL,
        encoding         BLOB    NOT NULL,
        photo            BLOB    NOT NULL,
        template_version INTEGER NOT NULL,
        created_at       TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_faces_name ON faces (name, id);
";

/// Credential store over one SQLite database.
///
/// The connection is shared behind a mutex so a single store can serve
/// several sessions.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open (creating if needed) a database file and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        tracing::info!(path = %path.display(), journal = %journal, "opened credential store");

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Private in-memory database, mainly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(CREATE_SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    fn insert(&self, identity: &str, template: &FaceTemplate, photo: &[u8]) -> Result<i64, StoreError> {
        if identity.is_empty() {
            return Err(StoreError::EmptyIdentity);
        }

        let encoding = template.to_le_bytes();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO faces (name, encoding, photo, template_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![identity, encoding, photo, TEMPLATE_VERSION, created_at],
        )?;
        let id = conn.last_insert_rowid();

        tracing::debug!(
            id,
            identity,
            template_bytes = encoding.len(),
            photo_bytes = photo.len(),
            "credential record inserted"
        );

        Ok(id)
    }

    fn find_latest(&self, identity: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, name, encoding, photo, template_version, created_at
                 FROM faces WHERE name = ?1 ORDER BY id DESC LIMIT 1",
                params![identity],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, identity, encoding, photo, stored_version, created_at)) = row else {
            return Ok(None);
        };

        let template_version = u32::try_from(stored_version).map_err(|_| StoreError::Corrupt {
            id,
            source: TemplateError::UnsupportedVersion(stored_version),
        })?;

        let template = FaceTemplate::from_le_bytes(&encoding, template_version)
            .map_err(|source| StoreError::Corrupt { id, source })?;

        Ok(Some(CredentialRecord {
            id,
            identity,
            template,
            photo,
            template_version,
            created_at,
        }))
    }

    fn list(&self) -> Result<Vec<RecordSummary>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, length(encoding), length(photo), template_version, created_at
             FROM faces ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RecordSummary {
                id: row.get(0)?,
                identity: row.get(1)?,
                template_bytes: row.get::<_, i64>(2)? as usize,
                photo_bytes: row.get::<_, i64>(3)? as usize,
                template_version: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::{TEMPLATE_BYTES, TEMPLATE_LEN};
    use tempfile::TempDir;

    fn template(seed: f64) -> FaceTemplate {
        FaceTemplate::new((0..TEMPLATE_LEN).map(|i| seed + i as f64 * 1e-3).collect()).unwrap()
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_insert_appends_without_merging() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        let first = store.insert("alice", &template(0.1), b"png-1").unwrap();
        let second = store.insert("alice", &template(0.2), b"png-2").unwrap();
        assert!(second > first);
        assert_eq!(store.count().unwrap(), 2);

        let latest = store.find_latest("alice").unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.template, template(0.2));
        assert_eq!(latest.photo, b"png-2");
    }

    #[test]
    fn test_find_latest_unknown_identity() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.insert("alice", &template(0.1), b"png").unwrap();
        assert!(store.find_latest("bob").unwrap().is_none());
    }

    #[test]
    fn test_template_round_trip_is_bit_exact() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        let original = FaceTemplate::new(
            (0..TEMPLATE_LEN).map(|i| (i as f64).sin() / 3.0).collect(),
        )
        .unwrap();
        store.insert("alice", &original, b"png").unwrap();

        let record = store.find_latest("alice").unwrap().unwrap();
        assert_eq!(record.template_version, TEMPLATE_VERSION);
        for (a, b) in original.values().iter().zip(record.template.values()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].template_bytes, TEMPLATE_BYTES);
        assert_eq!(listed[0].photo_bytes, 3);
    }

    #[test]
    fn test_rejects_empty_identity() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        assert!(matches!(
            store.insert("", &template(0.1), b"png"),
            Err(StoreError::EmptyIdentity)
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_corrupt_blob_is_reported() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO faces (name, encoding, photo, template_version, created_at)
                 VALUES ('mallory', x'0011', x'', 1, '2026-01-01T00:00:00.000Z')",
                [],
            )
            .unwrap();
        }
        assert!(matches!(
            store.find_latest("mallory"),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_out_of_range_version_is_corrupt() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        let encoding = template(0.1).to_le_bytes();
        for version in [-1i64, i64::from(u32::MAX) + 1] {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO faces (name, encoding, photo, template_version, created_at)
                 VALUES ('mallory', ?1, x'', ?2, '2026-01-01T00:00:00.000Z')",
                params![encoding, version],
            )
            .unwrap();
            drop(conn);

            match store.find_latest("mallory") {
                Err(StoreError::Corrupt {
                    source: TemplateError::UnsupportedVersion(v),
                    ..
                }) => assert_eq!(v, version),
                other => panic!("expected corrupt record, got {other:?}"),
            }
        }

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].template_version, -1);
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("faces.db");

        let id = {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.insert("alice", &template(0.3), b"png").unwrap()
        };

        let reopened = SqliteCredentialStore::open(&path).unwrap();
        let record = reopened.find_latest("alice").unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.template, template(0.3));
        assert_eq!(reopened.list().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_inserts_from_threads() {
        let store = std::sync::Arc::new(SqliteCredentialStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..5 {
                        store
                            .insert(&format!("user{t}"), &template(i as f64), b"png")
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.count().unwrap(), 20);
    }
}
