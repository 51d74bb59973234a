//! Local persistence for the sync cache.
//!
//! - [`backend`] - The `StoreBackend` contract and atomic `WriteBatch`
//! - [`sqlite`] - SQLite engine (WAL, IMMEDIATE transactions)
//! - [`memory`] - In-memory engine for tests
//! - [`record_store`] - Merge, point-write, and indexed-read operations
//! - [`schema`] - Database schema definitions

pub mod backend;
pub mod memory;
pub mod record_store;
pub mod schema;
pub mod sqlite;

pub use backend::{StoreBackend, WriteBatch};
pub use memory::MemoryBackend;
pub use record_store::{
    DeltaMergeOptions, FormSnapshot, FullSyncOptions, MergeStats, RecordStore, UpsertOptions,
    UpsertOutcome, WriteOrigin,
};
pub use sqlite::SqliteBackend;
