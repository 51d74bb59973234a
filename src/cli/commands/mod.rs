//! Command implementations.

pub mod entry;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{SyncSettings, resolve_db_path, resolve_source_dir};
use crate::error::{Error, Result};
use crate::remote::SnapshotReader;
use crate::storage::{RecordStore, SqliteBackend};
use crate::sync::SyncEngine;
use crate::time::SystemClock;

pub type Engine = SyncEngine<SqliteBackend, SnapshotReader>;

/// Open the cache database.
///
/// # Errors
///
/// Returns an error if no path resolves or the database cannot be opened.
pub fn open_store(db_path: Option<&PathBuf>) -> Result<Arc<RecordStore<SqliteBackend>>> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine database path".into()))?;
    let backend = SqliteBackend::open(&db_path)?;
    Ok(Arc::new(RecordStore::new(backend, Arc::new(SystemClock))))
}

/// Open the cache plus the snapshot source.
///
/// # Errors
///
/// Returns an error if settings, database, or source cannot be resolved.
pub fn open_engine(db_path: Option<&PathBuf>, source: Option<&PathBuf>) -> Result<Engine> {
    let settings = SyncSettings::load()?;
    let source_dir = resolve_source_dir(source.map(PathBuf::as_path))?;
    let remote = SnapshotReader::new(source_dir, settings.codec());
    Ok(SyncEngine::new(open_store(db_path)?, Arc::new(remote), settings))
}

/// Print `value` as JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
