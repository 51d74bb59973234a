//! SQLite storage engine.
//!
//! Every batch runs inside an IMMEDIATE transaction so a crash mid-merge
//! never leaves half the rows written without the matching metadata.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::model::{FormMeta, Record};
use crate::storage::backend::{StoreBackend, WriteBatch};
use crate::storage::schema::apply_schema;

const RECORD_COLUMNS: &str = "entry_id, form_id, data, data_timestamps, created_at, modified_at,
     created_at_epoch_ms, modified_at_epoch_ms, sequence, created_by, modified_by, row_index, written_at";

/// Matches rows the batch fence (`?3`) does not protect.
const UNFENCED: &str = "(?3 IS NULL OR records.written_at IS NULL OR records.written_at <= ?3)";

/// SQLite-based storage engine.
///
/// The connection is only touched from the blocking pool, never on an
/// async worker.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        apply_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut *guard)
        })
        .await
        .map_err(|e| Error::Other(format!("Database task failed: {e}")))?
    }
}

impl StoreBackend for SqliteBackend {
    async fn load_records(&self, form_id: &str) -> Result<Vec<Record>> {
        let form_id = form_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE form_id = ?1 ORDER BY entry_id"
            ))?;
            let rows = stmt
                .query_map([&form_id], map_record_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn load_record(&self, form_id: &str, entry_id: &str) -> Result<Option<Record>> {
        let (form_id, entry_id) = (form_id.to_string(), entry_id.to_string());
        self.with_conn(move |conn| Ok(stored_record(conn, &form_id, &entry_id)?))
            .await
    }

    async fn record_at(&self, form_id: &str, ordinal: usize) -> Result<Option<Record>> {
        let Ok(offset) = i64::try_from(ordinal) else {
            return Ok(None);
        };
        let form_id = form_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE form_id = ?1
                 ORDER BY entry_id LIMIT 1 OFFSET ?2"
            ))?;
            let record = stmt
                .query_row(rusqlite::params![form_id, offset], map_record_row)
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn load_meta(&self, form_id: &str) -> Result<Option<FormMeta>> {
        let form_id = form_id.to_string();
        self.with_conn(move |conn| Ok(stored_meta(conn, &form_id)?))
            .await
    }

    async fn form_ids(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT form_id FROM form_meta
                 UNION
                 SELECT DISTINCT form_id FROM records
                 ORDER BY form_id",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn commit(&self, form_id: &str, batch: WriteBatch) -> Result<()> {
        let form_id = form_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            apply_batch(&tx, &form_id, batch)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

fn stored_record(
    conn: &Connection,
    form_id: &str,
    entry_id: &str,
) -> rusqlite::Result<Option<Record>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM records WHERE form_id = ?1 AND entry_id = ?2"),
        [form_id, entry_id],
        map_record_row,
    )
    .optional()
}

fn stored_meta(conn: &Connection, form_id: &str) -> rusqlite::Result<Option<FormMeta>> {
    conn.query_row(
        "SELECT form_id, last_synced_at, last_remote_read_watermark, last_local_mutation_at,
                header_shape, schema_hash, entry_index
         FROM form_meta WHERE form_id = ?1",
        [form_id],
        map_meta_row,
    )
    .optional()
}

fn apply_batch(tx: &Transaction, form_id: &str, batch: WriteBatch) -> Result<()> {
    if batch.clear {
        tx.execute(
            "DELETE FROM records WHERE form_id = ?1
             AND (?2 IS NULL OR written_at IS NULL OR written_at <= ?2)",
            rusqlite::params![form_id, batch.fence],
        )?;
    }

    if !batch.deletes.is_empty() {
        let mut stmt = tx.prepare(&format!(
            "DELETE FROM records WHERE form_id = ?1 AND entry_id = ?2 AND {UNFENCED}"
        ))?;
        for entry_id in &batch.deletes {
            stmt.execute(rusqlite::params![form_id, entry_id, batch.fence])?;
        }
    }

    if !batch.puts.is_empty() {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO records ({RECORD_COLUMNS})
             VALUES (?1, ?2, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(form_id, entry_id) DO UPDATE SET
                data = excluded.data,
                data_timestamps = excluded.data_timestamps,
                created_at = excluded.created_at,
                modified_at = excluded.modified_at,
                created_at_epoch_ms = excluded.created_at_epoch_ms,
                modified_at_epoch_ms = excluded.modified_at_epoch_ms,
                sequence = excluded.sequence,
                created_by = excluded.created_by,
                modified_by = excluded.modified_by,
                row_index = excluded.row_index,
                written_at = excluded.written_at
             WHERE {UNFENCED}"
        ))?;
        for record in &batch.puts {
            stmt.execute(rusqlite::params![
                record.entry_id,
                form_id,
                batch.fence,
                serde_json::to_string(&record.data)?,
                serde_json::to_string(&record.data_timestamps)?,
                record.created_at,
                record.modified_at,
                record.created_at_epoch_ms,
                record.modified_at_epoch_ms,
                record.sequence,
                record.created_by,
                record.modified_by,
                record.row_index,
                record.written_at,
            ])?;
        }
    }

    if let Some(update) = batch.meta {
        let meta = update.apply(form_id, stored_meta(tx, form_id)?);
        tx.execute(
            "INSERT INTO form_meta (form_id, last_synced_at, last_remote_read_watermark,
                                    last_local_mutation_at, header_shape, schema_hash, entry_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(form_id) DO UPDATE SET
                last_synced_at = excluded.last_synced_at,
                last_remote_read_watermark = excluded.last_remote_read_watermark,
                last_local_mutation_at = excluded.last_local_mutation_at,
                header_shape = excluded.header_shape,
                schema_hash = excluded.schema_hash,
                entry_index = excluded.entry_index",
            rusqlite::params![
                form_id,
                meta.last_synced_at,
                meta.last_remote_read_watermark,
                meta.last_local_mutation_at,
                serde_json::to_string(&meta.header_shape)?,
                meta.schema_hash,
                serde_json::to_string(&meta.entry_index)?,
            ],
        )?;
    }

    Ok(())
}

/// Decode a JSON TEXT column.
fn json_column<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_record_row(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    Ok(Record {
        entry_id: row.get(0)?,
        form_id: row.get(1)?,
        data: json_column(row, 2)?,
        data_timestamps: json_column(row, 3)?,
        created_at: row.get(4)?,
        modified_at: row.get(5)?,
        created_at_epoch_ms: row.get(6)?,
        modified_at_epoch_ms: row.get(7)?,
        sequence: row.get(8)?,
        created_by: row.get(9)?,
        modified_by: row.get(10)?,
        row_index: row.get(11)?,
        written_at: row.get(12)?,
    })
}

fn map_meta_row(row: &rusqlite::Row) -> rusqlite::Result<FormMeta> {
    Ok(FormMeta {
        form_id: row.get(0)?,
        last_synced_at: row.get(1)?,
        last_remote_read_watermark: row.get(2)?,
        last_local_mutation_at: row.get(3)?,
        header_shape: json_column(row, 4)?,
        schema_hash: row.get(5)?,
        entry_index: json_column(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetaUpdate;
    use crate::sync::{EntryIndex, IndexUpdate};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn rec(id: &str, modified: i64) -> Record {
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), json!(format!("entry {id}")));
        Record::new_local("form", id, data, Some("tester"), modified)
    }

    #[tokio::test]
    async fn test_commit_and_load_roundtrip() {
        let backend = SqliteBackend::open_memory().unwrap();
        let mut record = rec("b", 1_700_000_000_000);
        record.row_index = Some(7);
        record.written_at = Some(42);

        backend
            .commit("form", WriteBatch::new().put(rec("a", 1)).put(record.clone()))
            .await
            .unwrap();

        let loaded = backend.load_record("form", "b").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(backend.load_record("other", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_at_follows_id_order() {
        let backend = SqliteBackend::open_memory().unwrap();
        backend
            .commit(
                "form",
                WriteBatch::new().put(rec("c", 1)).put(rec("a", 1)).put(rec("b", 1)),
            )
            .await
            .unwrap();

        assert_eq!(backend.record_at("form", 0).await.unwrap().unwrap().entry_id, "a");
        assert_eq!(backend.record_at("form", 2).await.unwrap().unwrap().entry_id, "c");
        assert!(backend.record_at("form", 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_meta_upsert() {
        let backend = SqliteBackend::open_memory().unwrap();
        assert!(backend.load_meta("form").await.unwrap().is_none());

        let update = MetaUpdate {
            synced_at: Some(10),
            header_shape: Some(vec!["Name".to_string(), "Email".to_string()]),
            index: IndexUpdate::Replace(EntryIndex::from_sorted_ids(["a", "b"])),
            ..MetaUpdate::new()
        };
        backend
            .commit("form", WriteBatch::new().meta(update))
            .await
            .unwrap();

        let mut expected = FormMeta::new("form");
        expected.last_synced_at = Some(10);
        expected.header_shape = vec!["Name".to_string(), "Email".to_string()];
        expected.entry_index = EntryIndex::from_sorted_ids(["a", "b"]);
        assert_eq!(backend.load_meta("form").await.unwrap(), Some(expected.clone()));

        let update = MetaUpdate {
            synced_at: Some(20),
            schema_hash: Some("abc".to_string()),
            ..MetaUpdate::new()
        };
        backend
            .commit("form", WriteBatch::new().meta(update))
            .await
            .unwrap();
        expected.last_synced_at = Some(20);
        expected.schema_hash = Some("abc".to_string());
        assert_eq!(backend.load_meta("form").await.unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn test_meta_merge_keeps_newer_local_mark() {
        let backend = SqliteBackend::open_memory().unwrap();
        let local = MetaUpdate {
            local_mutation_at: Some(1_100),
            index: IndexUpdate::Admit("offline".to_string()),
            ..MetaUpdate::new()
        };
        backend.commit("form", WriteBatch::new().meta(local)).await.unwrap();

        // A sync that read the remote before the local write landed
        let sync = MetaUpdate {
            synced_at: Some(1_200),
            remote_watermark: Some(900),
            confirm_local_up_to: Some(900),
            index: IndexUpdate::Replace(EntryIndex::from_sorted_ids(["a"])),
            ..MetaUpdate::new()
        };
        backend.commit("form", WriteBatch::new().meta(sync)).await.unwrap();

        let meta = backend.load_meta("form").await.unwrap().unwrap();
        assert_eq!(meta.last_local_mutation_at, Some(1_100));
        assert_eq!(meta.last_remote_read_watermark, Some(900));
        assert_eq!(meta.last_synced_at, Some(1_200));
    }

    #[tokio::test]
    async fn test_fence_protects_later_local_rows() {
        let backend = SqliteBackend::open_memory().unwrap();
        let mut local = rec("mine", 1);
        local.written_at = Some(200);
        let mut old = rec("old", 1);
        old.written_at = Some(50);
        backend
            .commit(
                "form",
                WriteBatch::new().put(local.clone()).put(old).put(rec("remote", 1)),
            )
            .await
            .unwrap();

        let mut overwrite = rec("mine", 999);
        overwrite.written_at = None;
        backend
            .commit(
                "form",
                WriteBatch::new()
                    .clear()
                    .delete("mine")
                    .put(overwrite)
                    .fence(Some(100)),
            )
            .await
            .unwrap();

        assert_eq!(backend.load_records("form").await.unwrap(), vec![local]);
    }

    #[tokio::test]
    async fn test_clear_and_delete_scoped_to_form() {
        let backend = SqliteBackend::open_memory().unwrap();
        backend
            .commit("form", WriteBatch::new().put(rec("a", 1)).put(rec("b", 1)))
            .await
            .unwrap();
        backend
            .commit("other", WriteBatch::new().put(rec("a", 1)))
            .await
            .unwrap();

        backend
            .commit("form", WriteBatch::new().delete("a"))
            .await
            .unwrap();
        assert_eq!(backend.load_records("form").await.unwrap().len(), 1);

        backend.commit("form", WriteBatch::new().clear()).await.unwrap();
        assert!(backend.load_records("form").await.unwrap().is_empty());
        assert_eq!(backend.load_records("other").await.unwrap().len(), 1);
        assert_eq!(backend.form_ids().await.unwrap(), vec!["form", "other"]);
    }

    #[tokio::test]
    async fn test_open_on_disk_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend
                .commit("form", WriteBatch::new().put(rec("a", 1)))
                .await
                .unwrap();
        }
        let reopened = SqliteBackend::open(&path).unwrap();
        assert_eq!(reopened.load_records("form").await.unwrap().len(), 1);
    }
}
