//! The transactional engine contract under the record store.
//!
//! Any engine that can hold a `(form_id, entry_id)`-keyed table plus one
//! metadata row per form, and write to both atomically, can back the cache.

use std::future::Future;

use crate::error::Result;
use crate::model::{FormMeta, MetaUpdate, Record};
use crate::time::EpochMs;

/// One atomic unit of writes for a single form.
///
/// Applied in order: clear, deletes, puts, metadata. The backend reads the
/// stored rows it touches inside the same transaction, so decisions that
/// depend on them hold even if another write landed after the caller
/// loaded its copy:
///
/// - rows stored with `written_at` later than `fence` survive the clear,
///   the deletes, and the puts;
/// - `meta` is folded into the stored metadata with [`MetaUpdate::apply`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub clear: bool,
    pub deletes: Vec<String>,
    pub puts: Vec<Record>,
    pub meta: Option<MetaUpdate>,
    pub fence: Option<EpochMs>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached record of the form first.
    #[must_use]
    pub fn clear(mut self) -> Self {
        self.clear = true;
        self
    }

    #[must_use]
    pub fn delete(mut self, entry_id: impl Into<String>) -> Self {
        self.deletes.push(entry_id.into());
        self
    }

    #[must_use]
    pub fn put(mut self, record: Record) -> Self {
        self.puts.push(record);
        self
    }

    #[must_use]
    pub fn meta(mut self, update: MetaUpdate) -> Self {
        self.meta = Some(update);
        self
    }

    /// Leave alone rows locally written after `anchor`.
    #[must_use]
    pub fn fence(mut self, anchor: Option<EpochMs>) -> Self {
        self.fence = anchor;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.clear && self.deletes.is_empty() && self.puts.is_empty() && self.meta.is_none()
    }

    /// Whether the fence protects a stored row.
    #[must_use]
    pub fn protects(&self, stored: &Record) -> bool {
        self.fence.is_some_and(|anchor| stored.written_after(anchor))
    }
}

/// Transactional storage engine.
///
/// Reads of a form's records always come back in ascending `entry_id`
/// order; ordinals in [`StoreBackend::record_at`] refer to that order.
pub trait StoreBackend: Send + Sync {
    /// All records of a form, ascending by id.
    fn load_records(&self, form_id: &str) -> impl Future<Output = Result<Vec<Record>>> + Send;

    fn load_record(
        &self,
        form_id: &str,
        entry_id: &str,
    ) -> impl Future<Output = Result<Option<Record>>> + Send;

    /// The record at `ordinal` in ascending-id order.
    fn record_at(
        &self,
        form_id: &str,
        ordinal: usize,
    ) -> impl Future<Output = Result<Option<Record>>> + Send;

    fn load_meta(&self, form_id: &str) -> impl Future<Output = Result<Option<FormMeta>>> + Send;

    /// Every form with cached records or metadata.
    fn form_ids(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Apply `batch` atomically: all of it or none of it.
    fn commit(&self, form_id: &str, batch: WriteBatch) -> impl Future<Output = Result<()>> + Send;
}
