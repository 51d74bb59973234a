//! Cache reconciliation.
//!
//! - [`freshness`] - Classify cache age into fresh / background / synchronous
//! - [`merge`] - Pure three-way merge planning
//! - [`index`] - Self-healing entry id -> ordinal index
//! - [`hash`] - Header-shape fingerprints
//! - [`tasks`] - Bounded registry for background refreshes
//! - [`engine`] - The orchestrator tying the above to a store and a remote
//!
//! # Safety of deletes
//!
//! A delta read only says "these rows changed". Rows missing from it are
//! never deleted unless the read also carried a closed-world id set, and
//! even then not while the cache holds a local write newer than the remote
//! snapshot.

pub mod engine;
pub mod freshness;
pub mod hash;
pub mod index;
pub mod merge;
pub mod tasks;

pub use engine::{
    EntriesView, FetchDecision, FetchState, GetOptions, ListOptions, ListOutcome, SyncEngine,
    SyncMode, decide_fetch,
};
pub use freshness::{Freshness, FreshnessThresholds, evaluate};
pub use hash::schema_hash;
pub use index::{EntryIndex, IndexUpdate, Located};
pub use merge::{MergePlan, plan};
pub use tasks::TaskRegistry;
