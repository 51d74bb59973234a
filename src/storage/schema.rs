//! Database schema definitions.
//!
//! Two tables: one row per cached record keyed `(form_id, entry_id)`, and
//! one metadata row per form. Timestamps are INTEGER epoch milliseconds;
//! maps and lists are JSON TEXT.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the cache database.
pub const SCHEMA_SQL: &str = r"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Cached Records
-- ====================

CREATE TABLE IF NOT EXISTS records (
    form_id TEXT NOT NULL,
    entry_id TEXT NOT NULL,
    data TEXT NOT NULL DEFAULT '{}',
    data_timestamps TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT '',
    modified_at TEXT NOT NULL DEFAULT '',
    created_at_epoch_ms INTEGER,
    modified_at_epoch_ms INTEGER,
    sequence INTEGER,
    created_by TEXT,
    modified_by TEXT,
    row_index INTEGER,
    written_at INTEGER,
    PRIMARY KEY (form_id, entry_id)
);

CREATE INDEX IF NOT EXISTS idx_records_form_modified ON records(form_id, modified_at_epoch_ms);

-- ====================
-- Per-Form Metadata
-- ====================

CREATE TABLE IF NOT EXISTS form_meta (
    form_id TEXT PRIMARY KEY,
    last_synced_at INTEGER,
    last_remote_read_watermark INTEGER,
    last_local_mutation_at INTEGER,
    header_shape TEXT NOT NULL DEFAULT '[]',
    schema_hash TEXT,
    entry_index TEXT NOT NULL DEFAULT '{}'
);
";

/// Apply the schema to a connection.
///
/// Idempotent; safe to call on every open.
///
/// # Errors
///
/// Returns an error if a pragma or DDL statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
