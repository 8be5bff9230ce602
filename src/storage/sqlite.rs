//! SQLite storage backend for the dataset cache.
//!
//! The connection sits behind a `parking_lot::ReentrantMutex<RefCell<..>>`
//! so multi-statement operations can hold the database lock across their
//! whole transaction while single-statement helpers re-acquire it freely.

use std::cell::RefCell;
use std::path::Path;

use parking_lot::ReentrantMutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StorageError, SyncError};
use crate::types::{now_millis, DatasetMetadata, Record};

use super::LocalStorage;

/// Conventional database file name for on-disk stores.
pub const DEFAULT_DATABASE_NAME: &str = "pocket_sync_cache.db";

const DATASET_COLUMNS: &str = "dataset_name, creation_date, last_modified_date, \
     last_modified_by, storage_size_bytes, record_count, last_sync_count";

const RECORD_COLUMNS: &str = "key, value, sync_count, last_modified_date, \
     device_last_modified_date, last_modified_by, modified, deleted";

/// Map a rusqlite error into the crate taxonomy.
fn storage_err(e: rusqlite::Error) -> SyncError {
    SyncError::Storage(StorageError::Sqlite(e))
}

// ============================================================================
// SqliteLocalStore
// ============================================================================

pub struct SqliteLocalStore {
    conn: ReentrantMutex<RefCell<Connection>>,
}

impl SqliteLocalStore {
    /// Open a file-backed store, creating the schema if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )
        .map_err(storage_err)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS datasets (
                identity_id        TEXT NOT NULL,
                dataset_name       TEXT NOT NULL,
                creation_date      INTEGER NOT NULL DEFAULT 0,
                last_modified_date INTEGER NOT NULL DEFAULT 0,
                last_modified_by   TEXT NOT NULL DEFAULT '',
                storage_size_bytes INTEGER NOT NULL DEFAULT 0,
                record_count       INTEGER NOT NULL DEFAULT 0,
                last_sync_count    INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (identity_id, dataset_name)
            );
            CREATE TABLE IF NOT EXISTS records (
                identity_id               TEXT NOT NULL,
                dataset_name              TEXT NOT NULL,
                key                       TEXT NOT NULL,
                value                     TEXT,
                sync_count                INTEGER NOT NULL DEFAULT 0,
                last_modified_date        INTEGER NOT NULL DEFAULT 0,
                device_last_modified_date INTEGER NOT NULL DEFAULT 0,
                last_modified_by          TEXT NOT NULL DEFAULT '',
                modified                  INTEGER NOT NULL DEFAULT 0,
                deleted                   INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (identity_id, dataset_name, key)
            );
            CREATE INDEX IF NOT EXISTS idx_records_modified
                ON records (identity_id, dataset_name, modified);",
        )
        .map_err(storage_err)?;

        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
        })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Execute `f` with a shared reference to the underlying connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        f(&conn).map_err(storage_err)
    }

    /// Execute `f` inside an explicit transaction.
    fn in_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T>,
    {
        let guard = self.conn.lock();
        let mut conn = guard.borrow_mut();
        let tx = conn.transaction().map_err(storage_err)?;
        let value = f(&tx).map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
        Ok(value)
    }

    /// Parse a rusqlite row into a `Record`. Tombstones normalize their
    /// value to `None` regardless of what the column holds.
    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let value: Option<String> = row.get(1)?;
        let deleted: bool = row.get(7)?;
        Ok(Record {
            key: row.get(0)?,
            value: if deleted { None } else { value },
            sync_count: row.get(2)?,
            last_modified_date: row.get(3)?,
            device_last_modified_date: row.get(4)?,
            last_modified_by: row.get(5)?,
            modified: row.get(6)?,
        })
    }

    fn row_to_metadata(row: &rusqlite::Row<'_>) -> rusqlite::Result<DatasetMetadata> {
        Ok(DatasetMetadata {
            dataset_name: row.get(0)?,
            creation_date: row.get(1)?,
            last_modified_date: row.get(2)?,
            last_modified_by: row.get(3)?,
            storage_size_bytes: row.get(4)?,
            record_count: row.get(5)?,
            last_sync_count: row.get(6)?,
        })
    }

    /// Upsert one local write inside `conn`. Preserves `sync_count` and the
    /// server-authored modified-by; flips the dirty bit.
    fn execute_put_value(
        conn: &Connection,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
        value: Option<&str>,
        now: i64,
    ) -> rusqlite::Result<()> {
        conn.prepare_cached(
            "INSERT INTO records (identity_id, dataset_name, key, value, sync_count, \
              last_modified_date, device_last_modified_date, last_modified_by, modified, deleted) \
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5, '', 1, ?6) \
             ON CONFLICT (identity_id, dataset_name, key) DO UPDATE SET \
              value = excluded.value, \
              last_modified_date = excluded.last_modified_date, \
              device_last_modified_date = excluded.device_last_modified_date, \
              modified = 1, \
              deleted = excluded.deleted",
        )?
        .execute(params![
            identity_id,
            dataset_name,
            key,
            value,
            now,
            value.is_none(),
        ])?;
        Ok(())
    }

    /// Query all records matching `sql` (which selects `RECORD_COLUMNS`).
    fn query_records(
        &self,
        sql: &str,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Vec<Record>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt.query_map(params![identity_id, dataset_name], Self::row_to_record)?;
            rows.collect()
        })
    }
}

// ============================================================================
// LocalStorage implementation
// ============================================================================

impl LocalStorage for SqliteLocalStore {
    fn create_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()> {
        let now = now_millis();
        self.with_conn(|conn| {
            conn.prepare_cached(
                "INSERT OR IGNORE INTO datasets \
                  (identity_id, dataset_name, creation_date, last_modified_date) \
                 VALUES (?1, ?2, ?3, ?3)",
            )?
            .execute(params![identity_id, dataset_name, now])?;
            Ok(())
        })
    }

    fn get_datasets(&self, identity_id: &str) -> Result<Vec<DatasetMetadata>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {DATASET_COLUMNS} FROM datasets \
                 WHERE identity_id = ?1 ORDER BY dataset_name"
            ))?;
            let rows = stmt.query_map(params![identity_id], Self::row_to_metadata)?;
            rows.collect()
        })
    }

    fn get_dataset_metadata(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Option<DatasetMetadata>> {
        self.with_conn(|conn| {
            conn.prepare_cached(&format!(
                "SELECT {DATASET_COLUMNS} FROM datasets \
                 WHERE identity_id = ?1 AND dataset_name = ?2"
            ))?
            .query_row(params![identity_id, dataset_name], Self::row_to_metadata)
            .optional()
        })
    }

    fn update_dataset_metadata(
        &self,
        identity_id: &str,
        datasets: &[DatasetMetadata],
    ) -> Result<()> {
        self.in_transaction(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO datasets (identity_id, dataset_name, creation_date, \
                  last_modified_date, last_modified_by, storage_size_bytes, record_count, \
                  last_sync_count) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0) \
                 ON CONFLICT (identity_id, dataset_name) DO UPDATE SET \
                  creation_date = excluded.creation_date, \
                  last_modified_date = excluded.last_modified_date, \
                  last_modified_by = excluded.last_modified_by, \
                  storage_size_bytes = excluded.storage_size_bytes, \
                  record_count = excluded.record_count",
            )?;
            for dataset in datasets {
                stmt.execute(params![
                    identity_id,
                    dataset.dataset_name,
                    dataset.creation_date,
                    dataset.last_modified_date,
                    dataset.last_modified_by,
                    dataset.storage_size_bytes,
                    dataset.record_count,
                ])?;
            }
            Ok(())
        })
    }

    fn delete_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()> {
        let now = now_millis();
        self.in_transaction(|tx| {
            tx.execute(
                "UPDATE datasets SET last_sync_count = -1, last_modified_date = ?3 \
                 WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name, now],
            )?;
            tx.execute(
                "UPDATE records SET value = NULL, deleted = 1 \
                 WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name],
            )?;
            Ok(())
        })
    }

    fn purge_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()> {
        self.in_transaction(|tx| {
            tx.execute(
                "DELETE FROM records WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name],
            )?;
            tx.execute(
                "DELETE FROM datasets WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name],
            )?;
            Ok(())
        })
    }

    fn put_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let now = now_millis();
        self.with_conn(|conn| {
            Self::execute_put_value(conn, identity_id, dataset_name, key, value, now)
        })
    }

    fn put_all_values(
        &self,
        identity_id: &str,
        dataset_name: &str,
        values: &[(String, String)],
    ) -> Result<()> {
        let now = now_millis();
        self.in_transaction(|tx| {
            for (key, value) in values {
                Self::execute_put_value(tx, identity_id, dataset_name, key, Some(value.as_str()), now)?;
            }
            Ok(())
        })
    }

    fn get_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value: Option<Option<String>> = conn
                .prepare_cached(
                    "SELECT value FROM records \
                     WHERE identity_id = ?1 AND dataset_name = ?2 AND key = ?3 AND deleted = 0",
                )?
                .query_row(params![identity_id, dataset_name, key], |row| row.get(0))
                .optional()?;
            Ok(value.flatten())
        })
    }

    fn get_record(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<Record>> {
        self.with_conn(|conn| {
            conn.prepare_cached(&format!(
                "SELECT {RECORD_COLUMNS} FROM records \
                 WHERE identity_id = ?1 AND dataset_name = ?2 AND key = ?3"
            ))?
            .query_row(params![identity_id, dataset_name, key], Self::row_to_record)
            .optional()
        })
    }

    fn get_records(&self, identity_id: &str, dataset_name: &str) -> Result<Vec<Record>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records \
                 WHERE identity_id = ?1 AND dataset_name = ?2 ORDER BY key"
            ),
            identity_id,
            dataset_name,
        )
    }

    fn get_modified_records(&self, identity_id: &str, dataset_name: &str) -> Result<Vec<Record>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records \
                 WHERE identity_id = ?1 AND dataset_name = ?2 AND modified = 1 ORDER BY key"
            ),
            identity_id,
            dataset_name,
        )
    }

    fn put_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
        records: &[Record],
    ) -> Result<()> {
        self.in_transaction(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO records (identity_id, dataset_name, key, value, \
                  sync_count, last_modified_date, device_last_modified_date, last_modified_by, \
                  modified, deleted) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for record in records {
                stmt.execute(params![
                    identity_id,
                    dataset_name,
                    record.key,
                    record.value,
                    record.sync_count,
                    record.last_modified_date,
                    record.device_last_modified_date,
                    record.last_modified_by,
                    record.modified,
                    record.is_deleted(),
                ])?;
            }
            Ok(())
        })
    }

    fn get_last_sync_count(&self, identity_id: &str, dataset_name: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count: Option<i64> = conn
                .prepare_cached(
                    "SELECT last_sync_count FROM datasets \
                     WHERE identity_id = ?1 AND dataset_name = ?2",
                )?
                .query_row(params![identity_id, dataset_name], |row| row.get(0))
                .optional()?;
            Ok(count.unwrap_or(0))
        })
    }

    fn update_last_sync_count(
        &self,
        identity_id: &str,
        dataset_name: &str,
        last_sync_count: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.prepare_cached(
                "UPDATE datasets SET last_sync_count = ?3 \
                 WHERE identity_id = ?1 AND dataset_name = ?2",
            )?
            .execute(params![identity_id, dataset_name, last_sync_count])?;
            Ok(())
        })
    }

    fn change_identity_id(&self, old_identity_id: &str, new_identity_id: &str) -> Result<()> {
        if old_identity_id == new_identity_id {
            return Ok(());
        }
        self.in_transaction(|tx| {
            let names: Vec<String> = {
                let mut stmt =
                    tx.prepare("SELECT dataset_name FROM datasets WHERE identity_id = ?1")?;
                let rows = stmt.query_map(params![old_identity_id], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            for name in &names {
                let collides: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM datasets WHERE identity_id = ?1 AND dataset_name = ?2",
                        params![new_identity_id, name],
                        |row| row.get(0),
                    )
                    .optional()?;

                // The destination identity is the newer one: on a name
                // collision its dataset stays in place and the source
                // moves aside as a merged-dataset shadow for the
                // application to drain.
                let target_name = if collides.is_some() {
                    format!("{name}.{old_identity_id}")
                } else {
                    name.clone()
                };

                tx.execute(
                    "UPDATE datasets SET identity_id = ?1, dataset_name = ?2 \
                     WHERE identity_id = ?3 AND dataset_name = ?4",
                    params![new_identity_id, target_name, old_identity_id, name],
                )?;
                tx.execute(
                    "UPDATE records SET identity_id = ?1, dataset_name = ?2 \
                     WHERE identity_id = ?3 AND dataset_name = ?4",
                    params![new_identity_id, target_name, old_identity_id, name],
                )?;
            }

            tracing::debug!(
                old = %old_identity_id,
                new = %new_identity_id,
                datasets = names.len(),
                "relocated local data to new identity"
            );
            Ok(())
        })
    }

    fn wipe_data(&self) -> Result<()> {
        self.in_transaction(|tx| {
            tx.execute("DELETE FROM records", [])?;
            tx.execute("DELETE FROM datasets", [])?;
            Ok(())
        })?;
        tracing::info!("wiped all local datasets and records");
        Ok(())
    }
}
